//! The scan engine.
//!
//! `ScanSession` owns one run end to end: resolve every target, sweep the
//! full target×port cross product at the fast timeout, then re-probe the
//! ambiguous timeouts once at the slow timeout. Production order is
//! port-major — every host gets probed on one port before any host sees the
//! next port — so high-value findings across a large host set surface first.
//!
//! Results stream out as they happen; the finished `ScanReport` is the
//! frozen aggregate.

pub mod order;
pub mod pool;
pub mod probe;

pub use probe::{Probe, ProbeOutcome, TcpProbe};

use crate::resolver::Resolver;
use crate::types::Port;
use chrono::{DateTime, Utc};
use pool::ProbeTask;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Hard ceiling on concurrent probes.
pub const MAX_CONCURRENCY: usize = 1024;

/// Delay before the one-shot re-resolution of a failed target.
const RESOLVE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Tunables for one scan run.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Requested number of concurrent probes; clamped to [1, 1024].
    pub concurrency: usize,
    /// Connect deadline for the first pass.
    pub fast_timeout: Duration,
    /// Connect deadline for the retry pass.
    pub slow_timeout: Duration,
    /// Whether timed-out probes get a second, slower attempt.
    pub retry: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            concurrency: 300,
            fast_timeout: Duration::from_millis(300),
            slow_timeout: Duration::from_millis(1000),
            retry: true,
        }
    }
}

impl ScanOptions {
    /// The concurrency ceiling actually applied.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }
}

/// Live notifications emitted while a run progresses.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// A target resolved to one or more addresses.
    Resolved { target: String, addrs: Vec<IpAddr> },
    /// A target failed resolution (after the one-shot re-attempt) and is
    /// excluded from the scan.
    ResolveFailed { target: String },
    /// A port was confirmed open, first sighting only.
    PortOpen { target: String, port: Port },
    /// The retry pass is starting over this many timed-out probes.
    RetryPass { pending: usize },
}

/// Race-free, monotonic run counters, shared with whoever renders progress.
#[derive(Debug, Default)]
pub struct ScanProgress {
    total: AtomicU64,
    done: AtomicU64,
    opens: AtomicU64,
}

impl ScanProgress {
    /// Probes planned so far (grows when a pass starts).
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Probes completed so far.
    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    /// Distinct (target, port) pairs found open so far.
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    fn add_total(&self, n: u64) {
        self.total.fetch_add(n, Ordering::Relaxed);
    }

    fn inc_done(&self) {
        self.done.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_opens(&self) {
        self.opens.fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared between the workers of a run.
///
/// The only cross-worker mutation in the engine happens here: open-set
/// inserts, retry-set inserts, and counter bumps. Everything is either
/// behind a mutex or atomic; workers never coordinate beyond this.
pub(crate) struct ScanContext {
    pub targets: Vec<String>,
    pub probe: Arc<dyn Probe>,
    pub cancel: CancellationToken,
    pub events: Option<mpsc::UnboundedSender<ScanEvent>>,
    pub progress: Arc<ScanProgress>,
    opens: Vec<Mutex<BTreeSet<Port>>>,
    retry: Mutex<HashSet<(usize, IpAddr, Port)>>,
    timeouts: AtomicU64,
}

impl ScanContext {
    pub(crate) fn new(
        targets: Vec<String>,
        probe: Arc<dyn Probe>,
        cancel: CancellationToken,
        events: Option<mpsc::UnboundedSender<ScanEvent>>,
        progress: Arc<ScanProgress>,
    ) -> Self {
        let opens = targets.iter().map(|_| Mutex::new(BTreeSet::new())).collect();
        Self {
            targets,
            probe,
            cancel,
            events,
            progress,
            opens,
            retry: Mutex::new(HashSet::new()),
            timeouts: AtomicU64::new(0),
        }
    }

    /// Fold one probe outcome into the aggregate state.
    ///
    /// Open recording is idempotent per (target, port): extra sightings from
    /// other addresses or the retry pass change nothing and emit nothing.
    pub(crate) fn record(&self, task: &ProbeTask, outcome: ProbeOutcome, collect_timeouts: bool) {
        self.progress.inc_done();
        match outcome {
            ProbeOutcome::Open => {
                let newly = self.opens[task.target]
                    .lock()
                    .expect("open set lock")
                    .insert(task.port);
                if newly {
                    self.progress.inc_opens();
                    self.emit(ScanEvent::PortOpen {
                        target: self.targets[task.target].clone(),
                        port: task.port,
                    });
                }
            }
            ProbeOutcome::Timeout => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                if collect_timeouts {
                    self.retry
                        .lock()
                        .expect("retry set lock")
                        .insert((task.target, task.addr, task.port));
                }
            }
            ProbeOutcome::Closed | ProbeOutcome::Filtered => {}
        }
    }

    fn emit(&self, event: ScanEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn take_retry_set(&self) -> HashSet<(usize, IpAddr, Port)> {
        std::mem::take(&mut *self.retry.lock().expect("retry set lock"))
    }

    fn open_ports(&self, target: usize) -> Vec<Port> {
        self.opens[target]
            .lock()
            .expect("open set lock")
            .iter()
            .copied()
            .collect()
    }
}

/// Final per-target findings.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    /// The target as the caller wrote it.
    pub target: String,
    /// Whether resolution produced any address.
    pub resolved: bool,
    /// Resolved addresses, IPv4 before IPv6.
    pub addrs: Vec<IpAddr>,
    /// Open ports, ascending.
    pub open_ports: Vec<Port>,
}

/// Frozen aggregate of one finished (or aborted) run.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub targets: Vec<TargetReport>,
    /// Probes planned across both passes.
    pub probes_planned: u64,
    /// Probes actually completed.
    pub probes_done: u64,
    pub opens_total: u64,
    pub timeouts_total: u64,
    pub dns_failures: u64,
    /// True when the run was interrupted; findings are a valid partial view.
    pub aborted: bool,
}

impl ScanReport {
    /// True when no target resolved and nothing was probed.
    pub fn nothing_to_scan(&self) -> bool {
        self.targets.iter().all(|t| !t.resolved)
    }
}

/// One scan run: resolve, fast pass, optional retry pass, report.
///
/// A session is single-use; `run` consumes it.
pub struct ScanSession {
    targets: Vec<String>,
    ports: Vec<Port>,
    options: ScanOptions,
    resolver: Resolver,
    probe: Arc<dyn Probe>,
    events: Option<mpsc::UnboundedSender<ScanEvent>>,
    cancel: CancellationToken,
    progress: Arc<ScanProgress>,
}

impl ScanSession {
    /// Create a session over the given targets and (unordered) port set.
    ///
    /// Ports are deduplicated and put into priority order here; both passes
    /// reuse that ordering.
    pub fn new(targets: Vec<String>, ports: Vec<Port>, options: ScanOptions) -> Self {
        Self {
            targets,
            ports: order::prioritize(ports),
            options,
            resolver: Resolver::new(),
            probe: Arc::new(TcpProbe::new()),
            events: None,
            cancel: CancellationToken::new(),
            progress: Arc::new(ScanProgress::default()),
        }
    }

    /// Swap in a different probe implementation.
    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = probe;
        self
    }

    /// Subscribe to live events. Call at most once, before `run`.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ScanEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    /// Token that aborts the run when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Shared handle to the run counters.
    pub fn progress(&self) -> Arc<ScanProgress> {
        Arc::clone(&self.progress)
    }

    /// Drive the whole run and return the frozen report.
    pub async fn run(mut self) -> ScanReport {
        let started_at = Utc::now();
        let t0 = Instant::now();
        let workers = self.options.effective_concurrency();

        let addrs_by_target = self.resolve_all().await;
        let resolved_count = addrs_by_target.iter().filter(|a| !a.is_empty()).count();
        let dns_failures = (self.targets.len() - resolved_count) as u64;

        let ctx = Arc::new(ScanContext::new(
            self.targets.clone(),
            Arc::clone(&self.probe),
            self.cancel.clone(),
            self.events.clone(),
            Arc::clone(&self.progress),
        ));
        let ports = Arc::new(self.ports.clone());
        let addrs = Arc::new(addrs_by_target);

        if resolved_count > 0 {
            self.fast_pass(&ctx, &ports, &addrs, workers).await;

            if self.options.retry && !self.cancel.is_cancelled() {
                self.retry_pass(&ctx, &addrs, workers).await;
            }
        } else {
            debug!("no resolvable targets, nothing to scan");
        }

        let targets = self
            .targets
            .iter()
            .enumerate()
            .map(|(i, target)| TargetReport {
                target: target.clone(),
                resolved: !addrs[i].is_empty(),
                addrs: addrs[i].clone(),
                open_ports: ctx.open_ports(i),
            })
            .collect();

        ScanReport {
            started_at,
            elapsed_ms: t0.elapsed().as_millis() as u64,
            targets,
            probes_planned: self.progress.total(),
            probes_done: self.progress.done(),
            opens_total: self.progress.opens(),
            timeouts_total: ctx.timeouts.load(Ordering::Relaxed),
            dns_failures,
            aborted: self.cancel.is_cancelled(),
        }
    }

    /// Resolve every target in caller order, re-trying each failure once
    /// after a short delay.
    async fn resolve_all(&mut self) -> Vec<Vec<IpAddr>> {
        let mut addrs_by_target = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            if self.cancel.is_cancelled() {
                break;
            }
            let mut addrs = self.resolver.resolve(target).await;
            if addrs.is_empty() {
                tokio::time::sleep(RESOLVE_RETRY_DELAY).await;
                addrs = self.resolver.refresh(target).await;
            }

            if let Some(tx) = &self.events {
                let event = if addrs.is_empty() {
                    ScanEvent::ResolveFailed {
                        target: target.clone(),
                    }
                } else {
                    ScanEvent::Resolved {
                        target: target.clone(),
                        addrs: addrs.clone(),
                    }
                };
                let _ = tx.send(event);
            }
            addrs_by_target.push(addrs);
        }
        addrs_by_target.resize(self.targets.len(), Vec::new());
        addrs_by_target
    }

    /// Sweep the full cross product at the fast timeout.
    async fn fast_pass(
        &self,
        ctx: &Arc<ScanContext>,
        ports: &Arc<Vec<Port>>,
        addrs: &Arc<Vec<Vec<IpAddr>>>,
        workers: usize,
    ) {
        let planned =
            addrs.iter().map(|a| a.len() as u64).sum::<u64>() * ports.len() as u64;
        self.progress.add_total(planned);
        debug!(probes = planned, workers, "fast pass starting");

        let (tx, rx) = pool::task_channel(workers);
        let producer = tokio::spawn(produce_sweep(
            Arc::clone(ports),
            Arc::clone(addrs),
            None,
            tx,
            self.cancel.clone(),
        ));
        pool::drive_workers(
            rx,
            workers,
            self.options.fast_timeout,
            self.options.retry,
            Arc::clone(ctx),
        )
        .await;
        let _ = producer.await;
    }

    /// Re-probe the fast pass's timeouts once, at the slow timeout.
    async fn retry_pass(&self, ctx: &Arc<ScanContext>, addrs: &Arc<Vec<Vec<IpAddr>>>, workers: usize) {
        let pending = ctx.take_retry_set();
        if pending.is_empty() {
            return;
        }

        let retry_ports = Arc::new(order::prioritize(pending.iter().map(|&(_, _, p)| p)));
        self.progress.add_total(pending.len() as u64);
        ctx.emit(ScanEvent::RetryPass {
            pending: pending.len(),
        });
        debug!(probes = pending.len(), "retry pass starting");

        let (tx, rx) = pool::task_channel(workers);
        let producer = tokio::spawn(produce_sweep(
            retry_ports,
            Arc::clone(addrs),
            Some(pending),
            tx,
            self.cancel.clone(),
        ));
        // Timeouts in this pass are only counted, never requeued.
        pool::drive_workers(rx, workers, self.options.slow_timeout, false, Arc::clone(ctx)).await;
        let _ = producer.await;
    }
}

/// Feed one pass's tasks into the queue, port-major: every target and
/// address for one port before the next port. With a `filter` set, only the
/// listed (target, address, port) triples go out — the retry universe.
async fn produce_sweep(
    ports: Arc<Vec<Port>>,
    addrs: Arc<Vec<Vec<IpAddr>>>,
    filter: Option<HashSet<(usize, IpAddr, Port)>>,
    tx: mpsc::Sender<ProbeTask>,
    cancel: CancellationToken,
) {
    'outer: for &port in ports.iter() {
        for (target, target_addrs) in addrs.iter().enumerate() {
            for &addr in target_addrs {
                if let Some(filter) = &filter {
                    if !filter.contains(&(target, addr, port)) {
                        continue;
                    }
                }
                let task = ProbeTask { target, addr, port };
                tokio::select! {
                    _ = cancel.cancelled() => break 'outer,
                    sent = tx.send(task) => {
                        if sent.is_err() {
                            break 'outer;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Probe scripted per port, counting calls per (address, port).
    struct ScriptedProbe {
        by_port: HashMap<u16, ProbeOutcome>,
        fallback: ProbeOutcome,
        calls: Mutex<HashMap<(IpAddr, u16), u32>>,
    }

    impl ScriptedProbe {
        fn new(fallback: ProbeOutcome) -> Self {
            Self {
                by_port: HashMap::new(),
                fallback,
                calls: Mutex::new(HashMap::new()),
            }
        }

        fn set(mut self, port: u16, outcome: ProbeOutcome) -> Self {
            self.by_port.insert(port, outcome);
            self
        }

        fn calls_for(&self, addr: &str, port: u16) -> u32 {
            let addr: IpAddr = addr.parse().unwrap();
            self.calls
                .lock()
                .unwrap()
                .get(&(addr, port))
                .copied()
                .unwrap_or(0)
        }

        fn total_calls(&self) -> u32 {
            self.calls.lock().unwrap().values().sum()
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn probe(&self, addr: IpAddr, port: Port, _deadline: Duration) -> ProbeOutcome {
            *self
                .calls
                .lock()
                .unwrap()
                .entry((addr, port.as_u16()))
                .or_insert(0) += 1;
            self.by_port
                .get(&port.as_u16())
                .copied()
                .unwrap_or(self.fallback)
        }
    }

    fn ports(raw: &[u16]) -> Vec<Port> {
        raw.iter().map(|&p| Port::new_unchecked(p)).collect()
    }

    fn options(retry: bool) -> ScanOptions {
        ScanOptions {
            concurrency: 8,
            fast_timeout: Duration::from_millis(10),
            slow_timeout: Duration::from_millis(20),
            retry,
        }
    }

    #[test]
    fn test_concurrency_clamp() {
        let mut opts = ScanOptions::default();
        assert_eq!(opts.effective_concurrency(), 300);
        opts.concurrency = 5000;
        assert_eq!(opts.effective_concurrency(), 1024);
        opts.concurrency = 0;
        assert_eq!(opts.effective_concurrency(), 1);
    }

    #[tokio::test]
    async fn test_open_and_refused_ports() {
        let probe = Arc::new(
            ScriptedProbe::new(ProbeOutcome::Closed)
                .set(22, ProbeOutcome::Open)
                .set(80, ProbeOutcome::Open),
        );
        let session = ScanSession::new(
            vec!["10.0.0.1".to_string()],
            ports(&[22, 80, 81]),
            options(true),
        )
        .with_probe(probe.clone() as Arc<dyn Probe>);

        let report = session.run().await;

        assert_eq!(report.targets.len(), 1);
        assert_eq!(report.targets[0].open_ports, ports(&[22, 80]));
        assert_eq!(report.opens_total, 2);
        assert_eq!(report.timeouts_total, 0);
        assert_eq!(report.probes_planned, 3);
        assert_eq!(report.probes_done, 3);
        // The refused port never enters the retry pass.
        assert_eq!(probe.calls_for("10.0.0.1", 81), 1);
        assert!(!report.aborted);
    }

    #[tokio::test]
    async fn test_timeouts_are_retried_exactly_once() {
        let probe = Arc::new(ScriptedProbe::new(ProbeOutcome::Timeout));
        let session = ScanSession::new(
            vec!["192.0.2.1".to_string()],
            ports(&[1, 2, 3]),
            options(true),
        )
        .with_probe(probe.clone() as Arc<dyn Probe>);

        let report = session.run().await;

        for p in [1, 2, 3] {
            assert_eq!(probe.calls_for("192.0.2.1", p), 2, "port {p}");
        }
        assert_eq!(report.probes_planned, 6);
        assert_eq!(report.probes_done, 6);
        assert_eq!(report.timeouts_total, 6);
        assert_eq!(report.opens_total, 0);
    }

    #[tokio::test]
    async fn test_no_retry_means_single_attempt() {
        let probe = Arc::new(ScriptedProbe::new(ProbeOutcome::Timeout));
        let session = ScanSession::new(
            vec!["192.0.2.1".to_string()],
            ports(&[1, 2, 3]),
            options(false),
        )
        .with_probe(probe.clone() as Arc<dyn Probe>);

        let report = session.run().await;

        assert_eq!(probe.total_calls(), 3);
        assert_eq!(report.probes_planned, 3);
        assert_eq!(report.timeouts_total, 3);
    }

    #[tokio::test]
    async fn test_retry_pass_can_confirm_open() {
        // Times out on the first attempt, opens on the second.
        struct SlowStart {
            calls: Mutex<HashMap<(IpAddr, u16), u32>>,
        }

        #[async_trait]
        impl Probe for SlowStart {
            async fn probe(&self, addr: IpAddr, port: Port, _d: Duration) -> ProbeOutcome {
                let mut calls = self.calls.lock().unwrap();
                let seen = calls.entry((addr, port.as_u16())).or_insert(0);
                *seen += 1;
                if *seen == 1 {
                    ProbeOutcome::Timeout
                } else {
                    ProbeOutcome::Open
                }
            }
        }

        let mut session = ScanSession::new(
            vec!["192.0.2.9".to_string()],
            ports(&[443]),
            options(true),
        )
        .with_probe(Arc::new(SlowStart {
            calls: Mutex::new(HashMap::new()),
        }));
        let mut events = session.subscribe();

        let report = session.run().await;
        assert_eq!(report.opens_total, 1);
        assert_eq!(report.targets[0].open_ports, ports(&[443]));
        assert_eq!(report.timeouts_total, 1);

        let mut open_events = 0;
        while let Ok(event) = events.try_recv() {
            if let ScanEvent::PortOpen { target, port } = event {
                assert_eq!(target, "192.0.2.9");
                assert_eq!(port.as_u16(), 443);
                open_events += 1;
            }
        }
        assert_eq!(open_events, 1);
    }

    #[tokio::test]
    async fn test_unresolvable_target_contributes_no_probes() {
        let probe = Arc::new(ScriptedProbe::new(ProbeOutcome::Closed));
        let mut session = ScanSession::new(
            vec!["not..a.name".to_string(), "127.0.0.1".to_string()],
            ports(&[80]),
            options(true),
        )
        .with_probe(probe.clone() as Arc<dyn Probe>);
        let mut events = session.subscribe();

        let report = session.run().await;

        assert_eq!(report.dns_failures, 1);
        assert!(!report.targets[0].resolved);
        assert!(report.targets[1].resolved);
        assert_eq!(report.probes_planned, 1);
        assert_eq!(probe.total_calls(), 1);
        assert!(!report.nothing_to_scan());

        let mut failed = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ScanEvent::ResolveFailed { target } = event {
                failed.push(target);
            }
        }
        assert_eq!(failed, vec!["not..a.name".to_string()]);
    }

    #[tokio::test]
    async fn test_nothing_to_scan() {
        let probe = Arc::new(ScriptedProbe::new(ProbeOutcome::Open));
        let session = ScanSession::new(
            vec!["not..a.name".to_string()],
            ports(&[80]),
            options(true),
        )
        .with_probe(probe.clone() as Arc<dyn Probe>);

        let report = session.run().await;

        assert!(report.nothing_to_scan());
        assert_eq!(report.probes_planned, 0);
        assert_eq!(probe.total_calls(), 0);
        assert!(!report.aborted);
    }

    #[test]
    fn test_open_recording_dedups_across_addresses() {
        let progress = Arc::new(ScanProgress::default());
        let ctx = ScanContext::new(
            vec!["multi.example".to_string()],
            Arc::new(ScriptedProbe::new(ProbeOutcome::Open)),
            CancellationToken::new(),
            None,
            Arc::clone(&progress),
        );

        let port = Port::new_unchecked(443);
        let first = ProbeTask {
            target: 0,
            addr: "192.0.2.1".parse().unwrap(),
            port,
        };
        let second = ProbeTask {
            target: 0,
            addr: "2001:db8::1".parse().unwrap(),
            port,
        };

        ctx.record(&first, ProbeOutcome::Open, true);
        ctx.record(&second, ProbeOutcome::Open, true);

        assert_eq!(progress.opens(), 1);
        assert_eq!(progress.done(), 2);
        assert_eq!(ctx.open_ports(0), vec![port]);
    }

    #[tokio::test]
    async fn test_repeat_runs_are_identical() {
        let build = || {
            let targets = crate::types::TargetSpec::parse("10.0.0.1-2,10.0.0.1")
                .unwrap()
                .into_targets();
            ScanSession::new(targets, ports(&[22, 80, 8080]), options(true)).with_probe(Arc::new(
                ScriptedProbe::new(ProbeOutcome::Closed).set(22, ProbeOutcome::Open),
            ))
        };

        let first = build().run().await;
        let second = build().run().await;

        let opens = |r: &ScanReport| {
            r.targets
                .iter()
                .map(|t| (t.target.clone(), t.open_ports.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(opens(&first), opens(&second));
        assert_eq!(first.opens_total, second.opens_total);
    }
}
