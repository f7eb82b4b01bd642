//! HTTP transport seam
//!
//! A [`Transport`] issues a single GET and hands back the status, the
//! post-redirect URL and the body as a chunk stream. It owns the connection
//! pool, so instances are produced by a [`TransportBuilder`] and rebuilt by
//! the fetcher whenever the scheduling context changes.

use crate::config::ScanConfig;
use crate::error::FetchError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;

/// Response body delivered chunk by chunk
pub type BodyStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// Response head plus a lazily read body
pub struct TransportResponse {
    pub status: u16,
    pub final_url: String,
    pub body: BodyStream,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("final_url", &self.final_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET, following redirects
    async fn get(&self, url: &str) -> Result<TransportResponse, FetchError>;
}

/// Creates transports bound to the scheduling context they are built in
pub trait TransportBuilder: Send + Sync {
    fn build(&self) -> Result<Arc<dyn Transport>, FetchError>;
}

/// Client options for the reqwest transport
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub verify_tls: bool,
    pub max_redirects: usize,
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub max_idle_per_host: usize,
}

impl From<&ScanConfig> for TransportSettings {
    fn from(config: &ScanConfig) -> Self {
        Self {
            verify_tls: config.verify_tls,
            max_redirects: config.max_redirects,
            user_agent: config.user_agent.clone(),
            connect_timeout: config.attempt_timeout(),
            max_idle_per_host: config.per_host_limit,
        }
    }
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(settings: &TransportSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!settings.verify_tls)
            .redirect(reqwest::redirect::Policy::limited(settings.max_redirects))
            .user_agent(settings.user_agent.as_str())
            .connect_timeout(settings.connect_timeout)
            .pool_max_idle_per_host(settings.max_idle_per_host)
            .build()
            .map_err(|e| FetchError::Protocol(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();

        let body = stream::unfold(Some(response), |state| async move {
            let mut response = state?;
            match response.chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(response))),
                Ok(None) => None,
                Err(e) => Some((Err(FetchError::from(e)), None)),
            }
        })
        .boxed();

        Ok(TransportResponse {
            status,
            final_url,
            body,
        })
    }
}

/// Builds a fresh [`ReqwestTransport`] (and therefore a fresh pool) per call
#[derive(Debug, Clone)]
pub struct ReqwestTransportBuilder {
    settings: TransportSettings,
}

impl ReqwestTransportBuilder {
    pub fn new(settings: TransportSettings) -> Self {
        Self { settings }
    }
}

impl TransportBuilder for ReqwestTransportBuilder {
    fn build(&self) -> Result<Arc<dyn Transport>, FetchError> {
        Ok(Arc::new(ReqwestTransport::new(&self.settings)?))
    }
}
