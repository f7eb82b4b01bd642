//! Error handling for the faviscan scanner
//!
//! Two families of errors exist. [`ScanError`] rejects a whole request before
//! any probe is sent (or reports startup failures), while [`FetchError`] is
//! scoped to a single probe and ends up as a [`ProbeErrorKind`] entry in the
//! scan response.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Request-level error type
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Expanded targets exceed limit: {found} > {max}")]
    LimitExceeded { found: usize, max: usize },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Scan cancelled")]
    Cancelled,
}

/// Failure of a single fetch after the transport gave up on it
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("timeout: {0}")]
    Timeout(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl FetchError {
    pub fn kind(&self) -> ProbeErrorKind {
        match self {
            FetchError::Timeout(_) => ProbeErrorKind::Timeout,
            FetchError::Connection(_) => ProbeErrorKind::ConnectionError,
            FetchError::Protocol(_) => ProbeErrorKind::ProtocolError,
        }
    }

    /// Message without the kind prefix
    pub fn detail(&self) -> &str {
        match self {
            FetchError::Timeout(d) | FetchError::Connection(d) | FetchError::Protocol(d) => d,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else if e.is_connect() {
            FetchError::Connection(e.to_string())
        } else {
            FetchError::Protocol(e.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for FetchError {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        FetchError::Timeout(e.to_string())
    }
}

/// Kind of a captured per-probe failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeErrorKind {
    Timeout,
    ConnectionError,
    ProtocolError,
}

impl fmt::Display for ProbeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeErrorKind::Timeout => "Timeout",
            ProbeErrorKind::ConnectionError => "ConnectionError",
            ProbeErrorKind::ProtocolError => "ProtocolError",
        };
        f.write_str(name)
    }
}

/// Delay before retry number `attempt + 1`: `base * 2^attempt`
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

impl From<toml::de::Error> for ScanError {
    fn from(e: toml::de::Error) -> Self {
        ScanError::Config(e.to_string())
    }
}

impl From<quick_xml::DeError> for ScanError {
    fn from(e: quick_xml::DeError) -> Self {
        ScanError::Dataset(e.to_string())
    }
}
