//! Scan orchestrator
//!
//! Validates a request, expands it into probes and fans them out under a
//! per-scan semaphore. Every probe settles into either a `ScanResult` or a
//! `ProbeError`; nothing a single probe does can abort its siblings.

use crate::config::ScanConfig;
use crate::context::SchedulingContext;
use crate::error::{ProbeErrorKind, ScanError};
use crate::fetcher::{HttpFetcher, RateLimitedFetcher};
use crate::fingerprint::FingerprintLookup;
use crate::scanner::{Probe, ProbeError, ScanRequest, ScanResponse, ScanResult};
use crate::targets::{CidrTargetExpander, TargetExpander};
use crate::utils::content_hash;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{Id as TaskId, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Per-scan limits taken from the configuration
#[derive(Debug, Clone)]
pub struct ScanLimits {
    pub concurrency: usize,
    pub max_targets: usize,
    pub max_probes_per_job: usize,
    pub default_ports: Vec<u16>,
    pub favicon_path: String,
    /// Outer deadline for one probe, retries included
    pub probe_timeout: Duration,
}

impl From<&ScanConfig> for ScanLimits {
    fn from(config: &ScanConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            max_targets: config.max_targets,
            max_probes_per_job: config.max_probes_per_job,
            default_ports: config.default_ports.clone(),
            favicon_path: config.favicon_path.clone(),
            probe_timeout: config.probe_timeout(),
        }
    }
}

enum ProbeOutcome {
    Found(ScanResult),
    Failed(ProbeError),
}

/// Entry point of a scan; cheap to share behind an `Arc`
pub struct ScanOrchestrator {
    index: Arc<dyn FingerprintLookup>,
    fetcher: Arc<dyn HttpFetcher>,
    expander: Arc<dyn TargetExpander>,
    limits: ScanLimits,
}

impl std::fmt::Debug for ScanOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanOrchestrator")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl ScanOrchestrator {
    pub fn new(
        index: Arc<dyn FingerprintLookup>,
        fetcher: Arc<dyn HttpFetcher>,
        expander: Arc<dyn TargetExpander>,
        limits: ScanLimits,
    ) -> Self {
        Self {
            index,
            fetcher,
            expander,
            limits,
        }
    }

    /// Orchestrator with the reqwest fetcher and CIDR expander
    pub fn from_config(
        config: &ScanConfig,
        index: Arc<dyn FingerprintLookup>,
    ) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self::new(
            index,
            Arc::new(RateLimitedFetcher::from_config(config)),
            Arc::new(CidrTargetExpander::new()),
            ScanLimits::from(config),
        ))
    }

    pub fn limits(&self) -> &ScanLimits {
        &self.limits
    }

    /// Requested ports, or the defaults when none were given
    pub fn resolve_ports(&self, ports: Option<&[u32]>) -> crate::Result<Vec<u16>> {
        match ports {
            None | Some([]) => Ok(self.limits.default_ports.clone()),
            Some(list) => list
                .iter()
                .map(|&port| match u16::try_from(port) {
                    Ok(p) if p != 0 => Ok(p),
                    _ => Err(ScanError::Validation(format!("port out of range: {}", port))),
                })
                .collect(),
        }
    }

    /// Expand a request into probes, enforcing every size limit
    pub fn plan(&self, request: &ScanRequest) -> crate::Result<Vec<Probe>> {
        if self.limits.concurrency == 0 {
            return Err(ScanError::Config("Concurrency must be greater than 0".to_string()));
        }
        let ports = self.resolve_ports(request.ports.as_deref())?;
        let hosts = self.expander.expand(&request.targets, self.limits.max_targets)?;

        let total = hosts.len().checked_mul(ports.len()).unwrap_or(usize::MAX);
        if total > self.limits.max_probes_per_job {
            log::warn!(
                "Rejecting job: {} hosts x {} ports exceeds {} probes",
                hosts.len(),
                ports.len(),
                self.limits.max_probes_per_job
            );
            return Err(ScanError::Validation(format!(
                "job too large: {} > {}",
                total, self.limits.max_probes_per_job
            )));
        }

        let mut probes = Vec::with_capacity(total);
        for host in &hosts {
            for &port in &ports {
                probes.push(Probe::new(host.clone(), port));
            }
        }
        Ok(probes)
    }

    /// Run a scan to completion
    pub async fn scan(&self, request: &ScanRequest) -> crate::Result<ScanResponse> {
        self.scan_with_cancel(request, CancellationToken::new()).await
    }

    /// Run a scan, aborting every in-flight probe once `cancel` fires
    pub async fn scan_with_cancel(
        &self,
        request: &ScanRequest,
        cancel: CancellationToken,
    ) -> crate::Result<ScanResponse> {
        let start_time = Instant::now();
        let probes = self.plan(request)?;
        let probe_count = probes.len();

        log::info!(
            "Scanning {} probes with concurrency {}",
            probe_count,
            self.limits.concurrency
        );

        // Probes run in the caller's context, else in the one shared by this runtime
        let ctx = SchedulingContext::current()
            .or_else(SchedulingContext::for_runtime)
            .unwrap_or_default();
        let semaphore = Arc::new(Semaphore::new(self.limits.concurrency));
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::with_capacity(probe_count);

        for probe in probes {
            let label = probe.clone();
            let semaphore = semaphore.clone();
            let fetcher = self.fetcher.clone();
            let index = self.index.clone();
            let path = self.limits.favicon_path.clone();
            let probe_timeout = self.limits.probe_timeout;

            let task = async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return ProbeOutcome::Failed(ProbeError::new(
                            &probe,
                            ProbeErrorKind::ProtocolError,
                            "scan semaphore closed",
                        ))
                    }
                };

                let run = run_probe(&probe, fetcher.as_ref(), index.as_ref(), &path, probe_timeout);
                match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(panic) => {
                        let detail = panic_detail(panic.as_ref());
                        log::error!("Probe {} panicked: {}", probe.target(), detail);
                        let kind = ProbeErrorKind::ProtocolError;
                        ProbeOutcome::Failed(ProbeError::new(&probe, kind, detail))
                    }
                }
            };
            let handle = tasks.spawn(ctx.clone().scope(task));
            pending.insert(handle.id(), label);
        }

        let mut response = ScanResponse::default();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    log::warn!(
                        "Scan cancelled with {} of {} probes settled",
                        response.total(),
                        probe_count
                    );
                    return Err(ScanError::Cancelled);
                }
                joined = tasks.join_next_with_id() => match joined {
                    Some(joined) => settle(&mut response, &mut pending, joined),
                    None => break,
                },
            }
        }

        log::info!(
            "Scan complete: {} results ({} matched), {} errors in {:.2}s",
            response.results.len(),
            response.match_count(),
            response.errors.len(),
            start_time.elapsed().as_secs_f64()
        );

        Ok(response)
    }
}

async fn run_probe(
    probe: &Probe,
    fetcher: &dyn HttpFetcher,
    index: &dyn FingerprintLookup,
    path: &str,
    probe_timeout: Duration,
) -> ProbeOutcome {
    let scheme = probe.scheme();
    let fetched = tokio::time::timeout(
        probe_timeout,
        fetcher.fetch(scheme, &probe.host, probe.port, path),
    )
    .await;

    let outcome = match fetched {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            log::debug!("Probe {} failed: {}", probe.target(), e);
            return ProbeOutcome::Failed(ProbeError::from_fetch(probe, &e));
        }
        Err(_) => {
            log::debug!("Probe {} exceeded {:?}", probe.target(), probe_timeout);
            return ProbeOutcome::Failed(ProbeError::new(
                probe,
                ProbeErrorKind::Timeout,
                format!("probe exceeded {}ms", probe_timeout.as_millis()),
            ));
        }
    };

    let md5 = if (200..300).contains(&outcome.status) && !outcome.body.is_empty() {
        let hash = content_hash(&outcome.body);
        log::info!("{} favicon md5 {}", probe.target(), hash);
        Some(hash)
    } else {
        None
    };
    let matches = md5.as_deref().map(|h| index.lookup(h)).unwrap_or_default();

    ProbeOutcome::Found(ScanResult {
        target: probe.target(),
        host: probe.host.clone(),
        port: probe.port,
        scheme: scheme.to_string(),
        status: outcome.status,
        byte_len: outcome.body.len(),
        md5,
        final_url: Some(outcome.final_url),
        matches,
    })
}

/// Record a finished probe task; a task that failed to join still yields an error entry
fn settle(
    response: &mut ScanResponse,
    pending: &mut HashMap<TaskId, Probe>,
    joined: Result<(TaskId, ProbeOutcome), JoinError>,
) {
    match joined {
        Ok((id, outcome)) => {
            pending.remove(&id);
            match outcome {
                ProbeOutcome::Found(result) => response.results.push(result),
                ProbeOutcome::Failed(error) => response.errors.push(error),
            }
        }
        Err(e) => match pending.remove(&e.id()) {
            Some(probe) => {
                log::error!("Probe task {} failed to join: {}", probe.target(), e);
                let detail = format!("probe task failed: {}", e);
                response
                    .errors
                    .push(ProbeError::new(&probe, ProbeErrorKind::ProtocolError, detail));
            }
            None => log::error!("Unknown probe task failed to join: {}", e),
        },
    }
}

fn panic_detail(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("probe panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("probe panicked: {}", msg)
    } else {
        "probe panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fetcher::{
        probe_url, FetchOutcome, FetchSettings, Transport, TransportBuilder, TransportResponse,
    };
    use crate::fingerprint::{FingerprintIndex, FingerprintRecord};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone)]
    enum Reply {
        Body(u16, &'static [u8]),
        Fail(FetchError),
        Hang,
        Panic,
    }

    struct StubFetcher {
        calls: AtomicUsize,
        contexts: Mutex<HashSet<u64>>,
        reply: Box<dyn Fn(&str, u16) -> Reply + Send + Sync>,
    }

    impl StubFetcher {
        fn new(reply: impl Fn(&str, u16) -> Reply + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                contexts: Mutex::new(HashSet::new()),
                reply: Box::new(reply),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpFetcher for StubFetcher {
        async fn fetch(
            &self,
            scheme: &str,
            host: &str,
            port: u16,
            path: &str,
        ) -> Result<FetchOutcome, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(ctx) = SchedulingContext::current() {
                self.contexts.lock().unwrap().insert(ctx.id().as_u64());
            }

            match (self.reply)(host, port) {
                Reply::Body(status, body) => Ok(FetchOutcome {
                    status,
                    body: Bytes::from_static(body),
                    final_url: probe_url(scheme, host, port, path),
                    truncated: false,
                }),
                Reply::Fail(e) => Err(e),
                Reply::Hang => futures::future::pending().await,
                Reply::Panic => panic!("stub fetcher exploded"),
            }
        }
    }

    /// Tracks how many fetches are running at once
    #[derive(Default)]
    struct PeakFetcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl HttpFetcher for PeakFetcher {
        async fn fetch(
            &self,
            scheme: &str,
            host: &str,
            port: u16,
            path: &str,
        ) -> Result<FetchOutcome, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            Ok(FetchOutcome {
                status: 200,
                body: Bytes::from_static(b"FAKEFAVICON"),
                final_url: probe_url(scheme, host, port, path),
                truncated: false,
            })
        }
    }

    struct IconTransport;

    #[async_trait]
    impl Transport for IconTransport {
        async fn get(&self, url: &str) -> Result<TransportResponse, FetchError> {
            Ok(TransportResponse {
                status: 200,
                final_url: url.to_string(),
                body: futures::stream::iter(vec![Ok(Bytes::from_static(b"FAKEFAVICON"))]).boxed(),
            })
        }
    }

    #[derive(Default)]
    struct CountingBuilder {
        builds: AtomicUsize,
    }

    impl TransportBuilder for CountingBuilder {
        fn build(&self) -> Result<Arc<dyn Transport>, FetchError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(IconTransport))
        }
    }

    fn index_with(body: &[u8], name: &str) -> Arc<FingerprintIndex> {
        Arc::new(
            FingerprintIndex::builder()
                .with(&content_hash(body), FingerprintRecord::new(name))
                .build(),
        )
    }

    fn orchestrator(fetcher: Arc<dyn HttpFetcher>, config: &ScanConfig) -> ScanOrchestrator {
        ScanOrchestrator::new(
            index_with(b"FAKEFAVICON", "FakeApp"),
            fetcher,
            Arc::new(CidrTargetExpander::new()),
            ScanLimits::from(config),
        )
    }

    #[tokio::test]
    async fn test_failing_probe_does_not_affect_siblings() {
        let fetcher = StubFetcher::new(|host, _| {
            if host == "a.example" {
                Reply::Fail(FetchError::Connection("connection refused".into()))
            } else {
                Reply::Body(200, b"FAKEFAVICON")
            }
        });
        let scanner = orchestrator(fetcher, &ScanConfig::default());

        let request = ScanRequest::new(["a.example", "b.example"]).with_ports(vec![80]);
        let response = scanner.scan(&request).await.unwrap();

        assert_eq!(response.total(), 2);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].host, "a.example");
        assert_eq!(response.errors[0].kind, ProbeErrorKind::ConnectionError);
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].host, "b.example");
    }

    #[tokio::test]
    async fn test_matching_favicon_is_identified() {
        let fetcher = StubFetcher::new(|_, _| Reply::Body(200, b"FAKEFAVICON"));
        let scanner = orchestrator(fetcher, &ScanConfig::default());

        let response = scanner
            .scan(&ScanRequest::new(["10.0.0.5"]).with_ports(vec![443]))
            .await
            .unwrap();

        let result = &response.results[0];
        assert_eq!(result.scheme, "https");
        assert_eq!(result.md5.as_deref(), Some(content_hash(b"FAKEFAVICON").as_str()));
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].name, "FakeApp");
        assert_eq!(result.final_url.as_deref(), Some("https://10.0.0.5/favicon.ico"));
    }

    #[tokio::test]
    async fn test_unknown_favicon_has_hash_but_no_matches() {
        let fetcher = StubFetcher::new(|_, _| Reply::Body(200, b"some other icon"));
        let scanner = orchestrator(fetcher, &ScanConfig::default());

        let response = scanner
            .scan(&ScanRequest::new(["10.0.0.5"]).with_ports(vec![80]))
            .await
            .unwrap();

        assert!(response.results[0].md5.is_some());
        assert!(response.results[0].matches.is_empty());
    }

    #[tokio::test]
    async fn test_no_hash_for_error_status_or_empty_body() {
        let fetcher = StubFetcher::new(|_, port| {
            if port == 80 {
                Reply::Body(404, b"FAKEFAVICON")
            } else {
                Reply::Body(200, b"")
            }
        });
        let scanner = orchestrator(fetcher, &ScanConfig::default());

        let response = scanner
            .scan(&ScanRequest::new(["a.example"]).with_ports(vec![80, 8080]))
            .await
            .unwrap();

        assert_eq!(response.results.len(), 2);
        for result in &response.results {
            assert!(result.md5.is_none());
            assert!(result.matches.is_empty());
        }
    }

    #[tokio::test]
    async fn test_oversized_job_rejected_before_fetching() {
        let fetcher = StubFetcher::new(|_, _| Reply::Body(200, b"FAKEFAVICON"));
        let config = ScanConfig::default().with_limits(2048, 4);
        let scanner = orchestrator(fetcher.clone(), &config);

        // 2 hosts x 3 default ports
        let result = scanner.scan(&ScanRequest::new(["10.0.0.0/30"])).await;

        match result {
            Err(ScanError::Validation(msg)) => assert_eq!(msg, "job too large: 6 > 4"),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_expansion_limit_rejected_before_fetching() {
        let fetcher = StubFetcher::new(|_, _| Reply::Body(200, b"FAKEFAVICON"));
        let config = ScanConfig::default().with_limits(1, 10_000);
        let scanner = orchestrator(fetcher.clone(), &config);

        let result = scanner.scan(&ScanRequest::new(["10.0.0.0/30"])).await;

        assert!(matches!(result, Err(ScanError::LimitExceeded { found: 2, max: 1 })));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_ports_rejected() {
        let fetcher = StubFetcher::new(|_, _| Reply::Body(200, b"FAKEFAVICON"));
        let scanner = orchestrator(fetcher.clone(), &ScanConfig::default());

        for port in [0, 65536, 70000] {
            let result = scanner
                .scan(&ScanRequest::new(["a.example"]).with_ports(vec![80, port]))
                .await;
            assert!(matches!(result, Err(ScanError::Validation(_))));
        }
        assert_eq!(fetcher.calls(), 0);
    }

    #[test]
    fn test_empty_or_missing_ports_use_defaults() {
        let fetcher = StubFetcher::new(|_, _| Reply::Body(200, b""));
        let scanner = orchestrator(fetcher, &ScanConfig::default());

        assert_eq!(scanner.resolve_ports(None).unwrap(), vec![80, 443, 8080]);
        assert_eq!(scanner.resolve_ports(Some(&[])).unwrap(), vec![80, 443, 8080]);
        assert_eq!(scanner.resolve_ports(Some(&[8443])).unwrap(), vec![8443]);
    }

    #[test]
    fn test_plan_is_hosts_times_ports() {
        let fetcher = StubFetcher::new(|_, _| Reply::Body(200, b""));
        let scanner = orchestrator(fetcher, &ScanConfig::default());

        let probes = scanner
            .plan(&ScanRequest::new(["10.0.0.0/30", "a.example"]).with_ports(vec![80, 443]))
            .unwrap();

        assert_eq!(probes.len(), 6);
        assert_eq!(probes[0], Probe::new("10.0.0.1", 80));
        assert_eq!(probes[5], Probe::new("a.example", 443));
    }

    #[tokio::test]
    async fn test_panicking_probe_is_captured() {
        let fetcher = StubFetcher::new(|host, _| {
            if host == "boom.example" {
                Reply::Panic
            } else {
                Reply::Body(200, b"FAKEFAVICON")
            }
        });
        let scanner = orchestrator(fetcher, &ScanConfig::default());

        let response = scanner
            .scan(&ScanRequest::new(["boom.example", "ok.example"]).with_ports(vec![80]))
            .await
            .unwrap();

        assert_eq!(response.results.len(), 1);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].kind, ProbeErrorKind::ProtocolError);
        assert!(response.errors[0].detail.contains("stub fetcher exploded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_deadline_becomes_timeout_error() {
        let fetcher = StubFetcher::new(|_, _| Reply::Hang);
        let config = ScanConfig::default().with_timeout(100).with_retries(0, 10);
        let scanner = orchestrator(fetcher, &config);

        let response = scanner
            .scan(&ScanRequest::new(["slow.example"]).with_ports(vec![80]))
            .await
            .unwrap();

        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].kind, ProbeErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_scan() {
        let fetcher = StubFetcher::new(|_, _| Reply::Hang);
        let scanner = orchestrator(fetcher, &ScanConfig::default());
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = scanner
            .scan_with_cancel(&ScanRequest::new(["a.example"]), token)
            .await;
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }

    #[tokio::test]
    async fn test_probes_share_callers_context() {
        let fetcher = StubFetcher::new(|_, _| Reply::Body(200, b"FAKEFAVICON"));
        let scanner = orchestrator(fetcher.clone(), &ScanConfig::default());
        let ctx = SchedulingContext::new();
        let id = ctx.id().as_u64();

        ctx.scope(scanner.scan(&ScanRequest::new(["10.0.0.0/29"])))
            .await
            .unwrap();

        let seen = fetcher.contexts.lock().unwrap().clone();
        assert_eq!(seen, HashSet::from([id]));
    }

    #[tokio::test]
    async fn test_repeated_scans_are_identical() {
        let fetcher = StubFetcher::new(|host, _| {
            if host.ends_with(".1") {
                Reply::Fail(FetchError::Timeout("timed out".into()))
            } else {
                Reply::Body(200, b"FAKEFAVICON")
            }
        });
        let scanner = orchestrator(fetcher, &ScanConfig::default());
        let request = ScanRequest::new(["192.168.0.0/29"]);

        let mut first = scanner.scan(&request).await.unwrap();
        let mut second = scanner.scan(&request).await.unwrap();
        first.sort();
        second.sort();

        assert_eq!(first, second);
        assert_eq!(first.errors.len(), 3);
        assert_eq!(first.results.len(), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_probes_capped_by_concurrency() {
        let fetcher = Arc::new(PeakFetcher::default());
        let config = ScanConfig::default().with_concurrency(2);
        let scanner = orchestrator(fetcher.clone(), &config);

        let hosts: Vec<String> = (0..10).map(|i| format!("h{}.example", i)).collect();
        let response = scanner
            .scan(&ScanRequest::new(hosts).with_ports(vec![80]))
            .await
            .unwrap();

        assert_eq!(response.results.len(), 10);
        assert_eq!(fetcher.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_scans_share_runtime_transport() {
        let builder = Arc::new(CountingBuilder::default());
        let config = ScanConfig::default().with_concurrency(4);
        let fetcher = RateLimitedFetcher::new(FetchSettings::from(&config), builder.clone());
        let scanner = orchestrator(Arc::new(fetcher), &config);

        let first = ScanRequest::new(["10.0.0.0/27"]).with_ports(vec![80]);
        let second = ScanRequest::new(["10.0.1.0/27"]).with_ports(vec![80]);
        let (a, b) = tokio::join!(scanner.scan(&first), scanner.scan(&second));

        assert_eq!(a.unwrap().results.len(), 30);
        assert_eq!(b.unwrap().results.len(), 30);
        assert_eq!(builder.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_join_still_reports_probe() {
        let mut tasks = JoinSet::new();
        let handle = tasks.spawn(futures::future::pending::<ProbeOutcome>());
        let mut pending = HashMap::from([(handle.id(), Probe::new("lost.example", 8080))]);
        handle.abort();

        let joined = tasks.join_next_with_id().await.unwrap();
        let mut response = ScanResponse::default();
        settle(&mut response, &mut pending, joined);

        assert!(pending.is_empty());
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].host, "lost.example");
        assert_eq!(response.errors[0].port, 8080);
        assert_eq!(response.errors[0].kind, ProbeErrorKind::ProtocolError);
    }

    #[test]
    fn test_from_config_validates() {
        let config = ScanConfig::default().with_concurrency(0);
        let result = ScanOrchestrator::from_config(&config, Arc::new(FingerprintIndex::default()));
        assert!(matches!(result, Err(ScanError::Config(_))));
    }

    #[tokio::test]
    async fn test_zero_concurrency_rejected_before_fetching() {
        let fetcher = StubFetcher::new(|_, _| Reply::Body(200, b"FAKEFAVICON"));
        let config = ScanConfig::default().with_concurrency(0);
        let scanner = orchestrator(fetcher.clone(), &config);

        let result = scanner.scan(&ScanRequest::new(["a.example"])).await;

        assert!(matches!(result, Err(ScanError::Config(_))));
        assert_eq!(fetcher.calls(), 0);
    }
}
