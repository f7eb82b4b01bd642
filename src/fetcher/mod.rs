//! Rate-limited favicon fetcher
//!
//! [`RateLimitedFetcher`] issues one bounded GET per probe. Every attempt
//! passes through the global and per-host gates, runs under a fixed timeout
//! and reads the body in chunks up to the byte cap. Failed attempts are
//! retried with exponential backoff; the attempt counter is local to one
//! `fetch` call.
//!
//! The underlying transport is bound to the [`SchedulingContext`] it was
//! built in. When a fetch observes a different (or ended) context the old
//! transport is released and a new one is built before use. Fetches made
//! without an installed context use their runtime's implicit context.

pub mod gates;
pub mod transport;

use crate::config::ScanConfig;
use crate::context::{ContextWatch, SchedulingContext};
use crate::error::{backoff_delay, FetchError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::net::Ipv6Addr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub use gates::ConnectionGates;
pub use transport::{
    BodyStream, ReqwestTransport, ReqwestTransportBuilder, Transport, TransportBuilder,
    TransportResponse, TransportSettings,
};

/// Result of a completed fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub status: u16,
    /// Body bytes, cut at the configured cap
    pub body: Bytes,
    /// URL after redirects
    pub final_url: String,
    pub truncated: bool,
}

/// Fetch interface consumed by the scan engine
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(
        &self,
        scheme: &str,
        host: &str,
        port: u16,
        path: &str,
    ) -> Result<FetchOutcome, FetchError>;
}

/// Limits applied by the fetcher
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub concurrency: usize,
    pub per_host_limit: usize,
    pub attempt_timeout: Duration,
    pub max_bytes: usize,
    pub retries: u32,
    pub retry_backoff: Duration,
}

impl From<&ScanConfig> for FetchSettings {
    fn from(config: &ScanConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            per_host_limit: config.per_host_limit,
            attempt_timeout: config.attempt_timeout(),
            max_bytes: config.max_bytes,
            retries: config.retries,
            retry_backoff: config.retry_backoff(),
        }
    }
}

/// `scheme://host[:port]/path`, omitting the scheme's default port
pub fn probe_url(scheme: &str, host: &str, port: u16, path: &str) -> String {
    let host = if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{}]", host)
    } else {
        host.to_string()
    };

    match (scheme, port) {
        ("http", 80) | ("https", 443) => format!("{}://{}{}", scheme, host, path),
        _ => format!("{}://{}:{}{}", scheme, host, port, path),
    }
}

struct BoundTransport {
    watch: ContextWatch,
    transport: Arc<dyn Transport>,
}

/// Fetcher with concurrency gates, retries and context-bound transport
pub struct RateLimitedFetcher {
    settings: FetchSettings,
    gates: ConnectionGates,
    builder: Arc<dyn TransportBuilder>,
    bound: Mutex<Option<BoundTransport>>,
}

impl std::fmt::Debug for RateLimitedFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedFetcher")
            .field("settings", &self.settings)
            .field("gates", &self.gates)
            .finish_non_exhaustive()
    }
}

impl RateLimitedFetcher {
    pub fn new(settings: FetchSettings, builder: Arc<dyn TransportBuilder>) -> Self {
        let gates = ConnectionGates::new(settings.concurrency, settings.per_host_limit);
        Self {
            settings,
            gates,
            builder,
            bound: Mutex::new(None),
        }
    }

    /// Fetcher backed by reqwest, configured from `config`
    pub fn from_config(config: &ScanConfig) -> Self {
        let builder = ReqwestTransportBuilder::new(TransportSettings::from(config));
        Self::new(FetchSettings::from(config), Arc::new(builder))
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    fn slot(&self) -> MutexGuard<'_, Option<BoundTransport>> {
        self.bound.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Transport usable from the current scheduling context
    fn transport(&self) -> Result<Arc<dyn Transport>, FetchError> {
        let Some(ctx) = SchedulingContext::current().or_else(SchedulingContext::for_runtime) else {
            // Not driven by tokio: nothing may be pooled across calls
            log::debug!("No scheduling context available, using a transient transport");
            return self.builder.build();
        };

        let mut slot = self.slot();
        if let Some(bound) = slot.as_ref() {
            if bound.watch.is_current(&ctx) {
                return Ok(bound.transport.clone());
            }
            log::info!(
                "Scheduling context changed ({} -> {}), rebuilding HTTP transport",
                bound.watch.id(),
                ctx.id()
            );
        }

        // Release the previous pool before building its replacement
        *slot = None;
        let transport = self.builder.build()?;
        *slot = Some(BoundTransport {
            watch: ctx.watch(),
            transport: transport.clone(),
        });

        Ok(transport)
    }

    /// Release the bound transport; the next fetch rebuilds it
    pub fn close(&self) {
        if self.slot().take().is_some() {
            log::debug!("HTTP transport released");
        }
    }

    async fn attempt(&self, url: &str, host: &str) -> Result<FetchOutcome, FetchError> {
        let _pass = self.gates.acquire(host).await?;
        let transport = self.transport()?;

        let read = self.read_capped(transport.as_ref(), url);
        tokio::time::timeout(self.settings.attempt_timeout, read).await?
    }

    async fn read_capped(
        &self,
        transport: &dyn Transport,
        url: &str,
    ) -> Result<FetchOutcome, FetchError> {
        let max_bytes = self.settings.max_bytes;
        let mut response = transport.get(url).await?;
        let mut body = BytesMut::new();
        let mut truncated = false;

        while let Some(chunk) = response.body.next().await {
            body.extend_from_slice(&chunk?);
            if body.len() > max_bytes {
                log::warn!("Body truncated at {} bytes for {}", max_bytes, url);
                body.truncate(max_bytes);
                truncated = true;
                break;
            }
        }

        Ok(FetchOutcome {
            status: response.status,
            body: body.freeze(),
            final_url: response.final_url,
            truncated,
        })
    }
}

#[async_trait]
impl HttpFetcher for RateLimitedFetcher {
    async fn fetch(
        &self,
        scheme: &str,
        host: &str,
        port: u16,
        path: &str,
    ) -> Result<FetchOutcome, FetchError> {
        let url = probe_url(scheme, host, port, path);
        let mut attempt: u32 = 0;

        loop {
            log::debug!("Fetching {} (attempt {})", url, attempt + 1);
            match self.attempt(&url, host).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt < self.settings.retries => {
                    let delay = backoff_delay(self.settings.retry_backoff, attempt);
                    log::debug!("Fetch of {} failed ({}), retrying in {:?}", url, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
