//! Global and per-host concurrency gates for the fetcher

use crate::error::FetchError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Two independent limits: operations in flight overall and per host
#[derive(Debug)]
pub struct ConnectionGates {
    global: Arc<Semaphore>,
    per_host_limit: usize,
    per_host: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl ConnectionGates {
    pub fn new(global_limit: usize, per_host_limit: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_limit)),
            per_host_limit,
            per_host: Mutex::new(HashMap::new()),
        }
    }

    fn hosts(&self) -> MutexGuard<'_, HashMap<String, Arc<Semaphore>>> {
        self.per_host.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait for a global slot, then for a slot on `host`
    pub async fn acquire<'a>(&'a self, host: &'a str) -> Result<GatePass<'a>, FetchError> {
        let global = self
            .global
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Protocol("fetcher gate closed".to_string()))?;

        let gate = {
            let mut hosts = self.hosts();
            hosts
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
                .clone()
        };

        let mut pass = GatePass {
            gates: self,
            host,
            gate: Some(gate.clone()),
            host_permit: None,
            _global: global,
        };
        pass.host_permit = Some(
            gate.acquire_owned()
                .await
                .map_err(|_| FetchError::Protocol("host gate closed".to_string()))?,
        );

        Ok(pass)
    }

    /// Drop the host's semaphore once nobody holds or awaits it
    fn release(&self, host: &str, gate: Arc<Semaphore>) {
        let mut hosts = self.hosts();
        drop(gate);
        if hosts.get(host).map_or(false, |g| Arc::strong_count(g) == 1) {
            hosts.remove(host);
        }
    }

    /// Hosts with a live gate
    pub fn tracked_hosts(&self) -> usize {
        self.hosts().len()
    }

    pub fn available_global(&self) -> usize {
        self.global.available_permits()
    }
}

/// Held for the duration of one fetch attempt
#[derive(Debug)]
pub struct GatePass<'a> {
    gates: &'a ConnectionGates,
    host: &'a str,
    gate: Option<Arc<Semaphore>>,
    host_permit: Option<OwnedSemaphorePermit>,
    _global: OwnedSemaphorePermit,
}

impl Drop for GatePass<'_> {
    fn drop(&mut self) {
        self.host_permit.take();
        if let Some(gate) = self.gate.take() {
            self.gates.release(self.host, gate);
        }
    }
}
