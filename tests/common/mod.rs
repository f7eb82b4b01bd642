//! Loopback HTTP server shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Canned reply for one request path
#[derive(Debug, Clone)]
pub struct Route {
    pub path: &'static str,
    pub status: u16,
    pub body: Vec<u8>,
    pub location: Option<&'static str>,
    pub hang: bool,
}

impl Route {
    pub fn ok(path: &'static str, body: &[u8]) -> Self {
        Self {
            path,
            status: 200,
            body: body.to_vec(),
            location: None,
            hang: false,
        }
    }

    pub fn redirect(path: &'static str, location: &'static str) -> Self {
        Self {
            path,
            status: 302,
            body: Vec::new(),
            location: Some(location),
            hang: false,
        }
    }

    pub fn hang(path: &'static str) -> Self {
        Self {
            path,
            status: 200,
            body: Vec::new(),
            location: None,
            hang: true,
        }
    }
}

/// Running server; the listener lives on its own thread and runtime so it
/// outlives any runtime a test creates
pub struct TestServer {
    pub port: u16,
    hits: Arc<AtomicUsize>,
}

impl TestServer {
    pub fn start(routes: Vec<Route>) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let port = listener.local_addr().unwrap().port();
        let hits = Arc::new(AtomicUsize::new(0));
        let routes = Arc::new(routes);

        let counter = hits.clone();
        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        continue;
                    };
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(handle(socket, routes.clone()));
                }
            });
        });

        Self { port, hits }
    }

    /// Connections accepted so far
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// A port nothing listens on
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        302 => "Found",
        404 => "Not Found",
        _ => "Unknown",
    }
}

async fn handle(mut socket: TcpStream, routes: Arc<Vec<Route>>) {
    let mut request = Vec::new();
    let mut chunk = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&chunk[..n]),
        }
    }

    let text = String::from_utf8_lossy(&request);
    let path = text.split_whitespace().nth(1).unwrap_or("/").to_string();
    let route = routes.iter().find(|r| r.path == path).cloned().unwrap_or(Route {
        path: "",
        status: 404,
        body: b"not found".to_vec(),
        location: None,
        hang: false,
    });

    if route.hang {
        std::future::pending::<()>().await;
    }

    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        route.status,
        reason(route.status),
        route.body.len()
    );
    if let Some(location) = route.location {
        head.push_str(&format!("Location: {}\r\n", location));
    }
    head.push_str("\r\n");

    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(&route.body).await;
    let _ = socket.shutdown().await;
}
