//! Utility functions for the scanner

use md5::{Digest, Md5};
use std::io::Write;
use std::time::Duration;

/// Lower-case hex MD5 of `bytes`
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Logging utilities
pub struct Logger;

impl Logger {
    /// Initialize logger with specified level; `json` emits one object per line
    pub fn init(level: log::LevelFilter, json: bool) {
        let mut builder = env_logger::Builder::from_default_env();
        builder.filter_level(level);

        if json {
            builder.format(|buf, record| {
                let line = serde_json::json!({
                    "ts": chrono::Utc::now().to_rfc3339(),
                    "level": record.level().to_string(),
                    "target": record.target(),
                    "msg": record.args().to_string(),
                });
                writeln!(buf, "{}", line)
            });
        } else {
            builder.format_timestamp_secs();
        }

        // A second init (tests, embedding) keeps the first logger
        let _ = builder.try_init();
    }

    /// Log scan start
    pub fn log_scan_start(targets: usize, ports: usize) {
        log::info!("Starting favicon scan of {} target specs on {} ports", targets, ports);
    }

    /// Log scan completion
    pub fn log_scan_complete(duration: Duration, results: usize, errors: usize) {
        log::info!(
            "Scan completed in {:.2}s - {} results, {} errors",
            duration.as_secs_f64(),
            results,
            errors
        );
    }
}
