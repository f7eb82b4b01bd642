//! Scanner module: scan data model and the orchestrator

pub mod engine;

use crate::error::{FetchError, ProbeErrorKind};
use crate::fingerprint::FingerprintRecord;
use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;

pub use engine::{ScanLimits, ScanOrchestrator};

/// Scheme used to probe `port`
pub fn scheme_for(port: u16) -> &'static str {
    if port == 443 {
        "https"
    } else {
        "http"
    }
}

/// `host:port`, with IPv6 literals bracketed
pub fn target_label(host: &str, port: u16) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// One (host, port) check
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Probe {
    pub host: String,
    pub port: u16,
}

impl Probe {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn scheme(&self) -> &'static str {
        scheme_for(self.port)
    }

    pub fn target(&self) -> String {
        target_label(&self.host, self.port)
    }
}

/// Inbound scan call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub targets: Vec<String>,

    /// Omitted or empty means the configured defaults
    #[serde(default)]
    pub ports: Option<Vec<u32>>,
}

impl ScanRequest {
    pub fn new<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            ports: None,
        }
    }

    pub fn with_ports(mut self, ports: Vec<u32>) -> Self {
        self.ports = Some(ports);
        self
    }
}

/// Completed probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    /// `host:port`
    pub target: String,
    pub host: String,
    pub port: u16,
    pub scheme: String,
    pub status: u16,
    /// Bytes read, never above the configured cap
    pub byte_len: usize,
    /// Lower-case hex MD5 of the body; only for 2xx with a non-empty body
    pub md5: Option<String>,
    pub final_url: Option<String>,
    #[serde(default)]
    pub matches: Vec<FingerprintRecord>,
}

impl ScanResult {
    pub fn is_match(&self) -> bool {
        !self.matches.is_empty()
    }
}

/// Failed probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeError {
    pub target: String,
    pub host: String,
    pub port: u16,
    pub kind: ProbeErrorKind,
    pub detail: String,
}

impl ProbeError {
    pub fn new(probe: &Probe, kind: ProbeErrorKind, detail: impl Into<String>) -> Self {
        Self {
            target: probe.target(),
            host: probe.host.clone(),
            port: probe.port,
            kind,
            detail: detail.into(),
        }
    }

    pub fn from_fetch(probe: &Probe, error: &FetchError) -> Self {
        Self::new(probe, error.kind(), error.detail())
    }
}

/// Combined outcome of one scan call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResponse {
    pub results: Vec<ScanResult>,
    pub errors: Vec<ProbeError>,
}

impl ScanResponse {
    /// Settled probes, successful or not
    pub fn total(&self) -> usize {
        self.results.len() + self.errors.len()
    }

    pub fn match_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_match()).count()
    }

    /// Order entries by target for stable output
    pub fn sort(&mut self) {
        self.results.sort_by(|a, b| (&a.host, a.port).cmp(&(&b.host, b.port)));
        self.errors.sort_by(|a, b| (&a.host, a.port).cmp(&(&b.host, b.port)));
    }
}
