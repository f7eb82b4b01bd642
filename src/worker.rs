//! Job runner
//!
//! A [`ScanWorker`] consumes scan jobs one at a time. Its collaborators
//! (dataset index, fetcher, expander) are built on the first job and kept
//! for the worker's lifetime. Each job runs on its own single-threaded
//! runtime inside its own [`SchedulingContext`], which is what lets the
//! shared fetcher notice that the previous job's transport is unusable.
//!
//! `run_job` blocks; call it from a plain thread, never from inside a tokio
//! runtime.

use crate::config::ScanConfig;
use crate::context::SchedulingContext;
use crate::fingerprint::load_dataset;
use crate::scanner::{ScanOrchestrator, ScanRequest, ScanResponse};
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// A queued scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanJob {
    pub scan_id: Uuid,
    pub targets: Vec<String>,
    #[serde(default)]
    pub ports: Option<Vec<u32>>,
}

impl ScanJob {
    pub fn new(targets: Vec<String>, ports: Option<Vec<u32>>) -> Self {
        Self {
            scan_id: Uuid::new_v4(),
            targets,
            ports,
        }
    }

    pub fn request(&self) -> ScanRequest {
        ScanRequest {
            targets: self.targets.clone(),
            ports: self.ports.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Done,
    Error,
}

/// Outcome of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub scan_id: Uuid,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ScanResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobReport {
    pub fn is_done(&self) -> bool {
        self.status == JobStatus::Done
    }
}

/// Runs scan jobs against lazily built collaborators
#[derive(Debug)]
pub struct ScanWorker {
    config: ScanConfig,
    orchestrator: OnceCell<Arc<ScanOrchestrator>>,
}

impl ScanWorker {
    /// Worker for a validated configuration; nothing is loaded until the first job
    pub fn new(config: ScanConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            orchestrator: OnceCell::new(),
        })
    }

    /// Worker using a pre-built orchestrator instead of loading the dataset
    pub fn with_orchestrator(config: ScanConfig, orchestrator: Arc<ScanOrchestrator>) -> Self {
        Self {
            config,
            orchestrator: OnceCell::with_value(orchestrator),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// The orchestrator, built on first use
    pub fn orchestrator(&self) -> crate::Result<&Arc<ScanOrchestrator>> {
        self.orchestrator.get_or_try_init(|| {
            log::info!("Initialising scan collaborators");
            let index = load_dataset(&self.config.dataset_path, self.config.dataset_format)?;
            let orchestrator = ScanOrchestrator::from_config(&self.config, Arc::new(index))?;
            Ok(Arc::new(orchestrator))
        })
    }

    /// Run one job to completion and report its outcome
    pub fn run_job(&self, job: &ScanJob) -> JobReport {
        log::info!("Job {} accepted ({} target specs)", job.scan_id, job.targets.len());
        let started_at = Utc::now();

        let (status, result, error) = match self.execute(job) {
            Ok(mut response) => {
                response.sort();
                log::info!("Job {} done", job.scan_id);
                (JobStatus::Done, Some(response), None)
            }
            Err(e) => {
                log::error!("Job {} failed: {}", job.scan_id, e);
                (JobStatus::Error, None, Some(e.to_string()))
            }
        };

        JobReport {
            scan_id: job.scan_id,
            status,
            started_at,
            finished_at: Utc::now(),
            result,
            error,
        }
    }

    fn execute(&self, job: &ScanJob) -> crate::Result<ScanResponse> {
        let orchestrator = self.orchestrator()?.clone();
        let request = job.request();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let ctx = SchedulingContext::new();
        log::debug!("Job {} runs in {}", job.scan_id, ctx.id());

        runtime.block_on(ctx.scope(async move { orchestrator.scan(&request).await }))
    }
}
