//! Output formatting and management

use crate::worker::{JobReport, JobStatus};
use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Write};

/// Output format options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub file: Option<String>,
    pub colored: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            file: None,
            colored: true,
        }
    }
}

/// Main output manager
pub struct OutputManager {
    config: OutputConfig,
}

impl OutputManager {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    /// Write a job report to the configured sink
    pub fn write_report(&self, report: &JobReport) -> io::Result<()> {
        let output = self.render(report)?;

        match &self.config.file {
            Some(filename) => {
                let mut file = File::create(filename)?;
                file.write_all(output.as_bytes())?;
            }
            None => {
                print!("{}", output);
            }
        }

        Ok(())
    }

    pub fn render(&self, report: &JobReport) -> io::Result<String> {
        match self.config.format {
            OutputFormat::Text => Ok(self.format_text(report)),
            OutputFormat::Json => self.format_json(report),
        }
    }

    fn format_json(&self, report: &JobReport) -> io::Result<String> {
        let mut json = serde_json::to_string_pretty(report)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        json.push('\n');
        Ok(json)
    }

    /// Format a report as text
    fn format_text(&self, report: &JobReport) -> String {
        let mut output = String::new();
        output.push_str(&format!("Scan {}\n", report.scan_id));

        if report.status == JobStatus::Error {
            let reason = report.error.as_deref().unwrap_or("unknown error");
            output.push_str(&self.paint(&format!("Scan failed: {}\n", reason), |s| s.red().bold()));
            return output;
        }

        let Some(response) = &report.result else {
            return output;
        };

        if !response.results.is_empty() {
            output.push_str(&self.paint("RESULTS:\n", |s| s.green().bold()));
            for result in &response.results {
                let hash = result.md5.as_deref().unwrap_or("-");
                let line = format!(
                    "  {:<28} {:<5} {:>3} {:>8}B  {}",
                    result.target, result.scheme, result.status, result.byte_len, hash
                );

                if result.is_match() {
                    let names: Vec<&str> = result.matches.iter().map(|m| m.name.as_str()).collect();
                    output.push_str(&self.paint(&line, |s| s.green()));
                    let names = format!("  [{}]\n", names.join(", "));
                    output.push_str(&self.paint(&names, |s| s.cyan()));
                } else {
                    output.push_str(&line);
                    output.push('\n');
                }
            }
            output.push('\n');
        }

        if !response.errors.is_empty() {
            output.push_str(&self.paint("ERRORS:\n", |s| s.yellow().bold()));
            for error in &response.errors {
                let line = format!(
                    "  {:<28} {:<16} {}\n",
                    error.target,
                    error.kind.to_string(),
                    error.detail
                );
                output.push_str(&self.paint(&line, |s| s.yellow()));
            }
            output.push('\n');
        }

        output.push_str(&format!(
            "{} results ({} matched), {} errors in {:.2}s\n",
            response.results.len(),
            response.match_count(),
            response.errors.len(),
            (report.finished_at - report.started_at)
                .to_std()
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0)
        ));

        output
    }

    /// Apply color formatting if enabled
    fn paint<F>(&self, text: &str, style: F) -> String
    where
        F: Fn(&str) -> ColoredString,
    {
        if !self.config.colored {
            return text.to_string();
        }
        style(text).to_string()
    }
}
