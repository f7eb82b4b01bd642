//! Configuration module for the faviscan scanner

use crate::error::{backoff_delay, ScanError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Format of the fingerprint dataset on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFormat {
    /// Detect from the root element
    #[default]
    Auto,
    /// `<favicons><favicon>…` lists keyed by explicit md5 elements
    Favicons,
    /// Rapid7 recog `http_favicon.xml`
    Recog,
}

impl std::str::FromStr for DatasetFormat {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(DatasetFormat::Auto),
            "favicons" => Ok(DatasetFormat::Favicons),
            "recog" => Ok(DatasetFormat::Recog),
            other => Err(ScanError::Config(format!("Unknown dataset format: {}", other))),
        }
    }
}

/// Main configuration structure for scanning operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Simultaneous probes per scan, also the fetcher's global gate
    pub concurrency: usize,

    /// Simultaneous connections to one host
    pub per_host_limit: usize,

    /// Timeout for each fetch attempt (connect + read) in milliseconds
    pub timeout_ms: u64,

    /// Response bodies are truncated to this many bytes
    pub max_bytes: usize,

    /// Retries after the first attempt
    pub retries: u32,

    /// Backoff base in milliseconds
    pub retry_backoff_ms: u64,

    /// Maximum number of hosts after target expansion
    pub max_targets: usize,

    /// Maximum hosts x ports per job
    pub max_probes_per_job: usize,

    /// Ports used when a request omits them (or sends an empty list)
    pub default_ports: Vec<u16>,

    /// Verify TLS certificates on https probes
    pub verify_tls: bool,

    /// Resource path fetched on every probe
    pub favicon_path: String,

    /// Fingerprint dataset location
    pub dataset_path: PathBuf,

    /// Fingerprint dataset format
    pub dataset_format: DatasetFormat,

    /// User agent sent with every request
    pub user_agent: String,

    /// Redirects followed before giving up
    pub max_redirects: usize,

    /// Slack added on top of the fetcher budget for the per-probe deadline
    pub probe_grace_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: 200,
            per_host_limit: 5,
            timeout_ms: 3000,
            max_bytes: 2 * 1024 * 1024, // 2 MB
            retries: 1,
            retry_backoff_ms: 250,
            max_targets: 2048,
            max_probes_per_job: 10_000,
            default_ports: vec![80, 443, 8080],
            verify_tls: false,
            favicon_path: "/favicon.ico".to_string(),
            dataset_path: PathBuf::from("./data/favicons.xml"),
            dataset_format: DatasetFormat::Auto,
            user_agent: format!("faviscan/{}", env!("CARGO_PKG_VERSION")),
            max_redirects: 10,
            probe_grace_ms: 500,
        }
    }
}

impl ScanConfig {
    /// Set the default ports
    pub fn with_default_ports(mut self, ports: Vec<u16>) -> Self {
        self.default_ports = ports;
        self
    }

    /// Set the overall concurrency
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the per-attempt timeout
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set retry count and backoff base
    pub fn with_retries(mut self, retries: u32, backoff_ms: u64) -> Self {
        self.retries = retries;
        self.retry_backoff_ms = backoff_ms;
        self
    }

    /// Set the response byte cap
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Set expansion and job-size caps
    pub fn with_limits(mut self, max_targets: usize, max_probes_per_job: usize) -> Self {
        self.max_targets = max_targets;
        self.max_probes_per_job = max_probes_per_job;
        self
    }

    /// Timeout of a single fetch attempt
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Backoff base interval
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Worst case time the fetcher spends on one probe, retries included
    pub fn fetch_budget(&self) -> Duration {
        let attempts = self.retries.saturating_add(1);
        let mut budget = self.attempt_timeout().saturating_mul(attempts);
        for attempt in 0..self.retries {
            budget = budget.saturating_add(backoff_delay(self.retry_backoff(), attempt));
        }
        budget
    }

    /// Outer deadline applied to each probe by the orchestrator
    pub fn probe_timeout(&self) -> Duration {
        self.fetch_budget()
            .saturating_add(Duration::from_millis(self.probe_grace_ms))
    }

    /// Load configuration from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ScanError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: ScanConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load_default_config() -> crate::Result<Self> {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let config_path = home_dir.join(".faviscan.toml");

        if config_path.exists() {
            log::info!("Loading config from {}", config_path.display());
            return Self::from_toml_file(&config_path);
        }

        Ok(Self::default())
    }

    /// Apply `FAVISCAN_*` environment overrides
    pub fn apply_env_overrides(self) -> crate::Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(mut self, lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, raw: String) -> crate::Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| ScanError::Config(format!("Invalid value for {}: {:?}", key, raw)))
        }

        if let Some(v) = lookup("FAVISCAN_CONCURRENCY") {
            self.concurrency = parsed("FAVISCAN_CONCURRENCY", v)?;
        }
        if let Some(v) = lookup("FAVISCAN_PER_HOST_LIMIT") {
            self.per_host_limit = parsed("FAVISCAN_PER_HOST_LIMIT", v)?;
        }
        if let Some(v) = lookup("FAVISCAN_TIMEOUT_MS") {
            self.timeout_ms = parsed("FAVISCAN_TIMEOUT_MS", v)?;
        }
        if let Some(v) = lookup("FAVISCAN_MAX_BYTES") {
            self.max_bytes = parsed("FAVISCAN_MAX_BYTES", v)?;
        }
        if let Some(v) = lookup("FAVISCAN_RETRIES") {
            self.retries = parsed("FAVISCAN_RETRIES", v)?;
        }
        if let Some(v) = lookup("FAVISCAN_RETRY_BACKOFF_MS") {
            self.retry_backoff_ms = parsed("FAVISCAN_RETRY_BACKOFF_MS", v)?;
        }
        if let Some(v) = lookup("FAVISCAN_MAX_TARGETS") {
            self.max_targets = parsed("FAVISCAN_MAX_TARGETS", v)?;
        }
        if let Some(v) = lookup("FAVISCAN_MAX_PROBES_PER_JOB") {
            self.max_probes_per_job = parsed("FAVISCAN_MAX_PROBES_PER_JOB", v)?;
        }
        if let Some(v) = lookup("FAVISCAN_VERIFY_TLS") {
            self.verify_tls = v.trim().eq_ignore_ascii_case("true");
        }
        if let Some(v) = lookup("FAVISCAN_DATASET_PATH") {
            self.dataset_path = PathBuf::from(v);
        }

        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.concurrency == 0 {
            return Err(ScanError::Config("Concurrency must be greater than 0".to_string()));
        }

        if self.per_host_limit == 0 {
            return Err(ScanError::Config("Per-host limit must be greater than 0".to_string()));
        }

        if self.timeout_ms == 0 {
            return Err(ScanError::Config("Timeout must be greater than 0".to_string()));
        }

        if self.max_bytes == 0 {
            return Err(ScanError::Config("Max bytes must be greater than 0".to_string()));
        }

        if self.max_targets == 0 || self.max_probes_per_job == 0 {
            return Err(ScanError::Config(
                "Target and probe caps must be greater than 0".to_string(),
            ));
        }

        if self.default_ports.is_empty() {
            return Err(ScanError::Config("No default ports specified".to_string()));
        }

        if self.default_ports.contains(&0) {
            return Err(ScanError::Config("Default ports must be within 1-65535".to_string()));
        }

        if !self.favicon_path.starts_with('/') {
            return Err(ScanError::Config("Favicon path must start with '/'".to_string()));
        }

        Ok(())
    }
}
