//! faviscan - concurrent favicon fingerprint scanner
//!
//! Expands target specs into (host, port) probes, fetches `/favicon.ico`
//! from each under global and per-host limits, hashes the bodies and
//! matches the hashes against a fingerprint dataset.

pub mod config;
pub mod context;
pub mod error;
pub mod fetcher;
pub mod fingerprint;
pub mod output;
pub mod scanner;
pub mod targets;
pub mod utils;
pub mod worker;

// Re-export commonly used types
pub use config::{DatasetFormat, ScanConfig};
pub use context::SchedulingContext;
pub use error::{FetchError, ProbeErrorKind, ScanError};
pub use fetcher::{HttpFetcher, RateLimitedFetcher};
pub use fingerprint::{FingerprintIndex, FingerprintLookup, FingerprintRecord};
pub use scanner::{ProbeError, ScanOrchestrator, ScanRequest, ScanResponse, ScanResult};
pub use targets::{CidrTargetExpander, TargetExpander};
pub use worker::{JobReport, JobStatus, ScanJob, ScanWorker};

pub type Result<T> = std::result::Result<T, ScanError>;
