//! Scanner thread
//!
//! Once per interval:
//! 1. Enumerate the process's threads
//! 2. Claim each unseen, non-agent thread and start its sessions
//! 3. Run the promotion policy on the window's counts
//! 4. Reset every counter (start a new window)
//! 5. Collect consumer exit reports
//!
//! The scanner runs on its own thread ("hpt-scanner"), blacklisted before
//! its first cycle, and stops when its token is cancelled.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use hpt_core::{
    hdebug, herror, hinfo, hwarn, AccessAggregator, CancellationToken, HptResult,
    HugePageAdvisor, Promotion, PromotionEngine, ThreadLister, ThreadRegistry, Tid,
};

use crate::config::AgentConfig;
use crate::supervisor::{SessionSpawner, SpawnSummary};
use crate::threads::spawn_agent_thread;

/// Longest single sleep while waiting out an interval
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub threads_listed: usize,
    /// Threads claimed this cycle
    pub threads_added: Vec<Tid>,
    pub sessions: SpawnSummary,
    pub promotion: Option<Promotion>,
    pub exits_reaped: usize,
}

/// Totals over the scanner's lifetime, returned on shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub cycles: u64,
    pub threads_added: u64,
    pub sessions_started: u64,
    pub sessions_failed: u64,
    pub promotions: u64,
    pub hints_failed: u64,
    pub exits_reaped: u64,
    pub list_errors: u64,
}

impl ScanStats {
    fn absorb(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.threads_added += report.threads_added.len() as u64;
        self.sessions_started += report.sessions.started as u64;
        self.sessions_failed += report.sessions.failed as u64;
        if let Some(p) = report.promotion {
            self.promotions += 1;
            self.hints_failed += p.hints_failed as u64;
        }
        self.exits_reaped += report.exits_reaped as u64;
    }
}

/// Thread discovery plus the promotion decision loop
pub struct Scanner<L, A, S>
where
    L: ThreadLister,
    A: HugePageAdvisor,
    S: SessionSpawner,
{
    lister: L,
    spawner: S,
    engine: PromotionEngine<A>,
    aggregator: Arc<AccessAggregator>,
    registry: Arc<ThreadRegistry>,
    interval: Duration,
    stats: ScanStats,
}

impl<L, A, S> Scanner<L, A, S>
where
    L: ThreadLister,
    A: HugePageAdvisor,
    S: SessionSpawner,
{
    pub fn new(
        config: &AgentConfig,
        lister: L,
        advisor: A,
        spawner: S,
        aggregator: Arc<AccessAggregator>,
        registry: Arc<ThreadRegistry>,
    ) -> Self {
        let policy = config.merge_policy.build(config.threshold);
        Self {
            lister,
            spawner,
            engine: PromotionEngine::new(advisor, policy, config.hint_mode),
            aggregator,
            registry,
            interval: config.interval,
            stats: ScanStats::default(),
        }
    }

    pub fn engine(&self) -> &PromotionEngine<A> {
        &self.engine
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// One full cycle, without the interval sleep.
    pub fn scan_once(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        match self.lister.list_threads() {
            Ok(tids) => {
                report.threads_listed = tids.len();
                for tid in tids {
                    if !self.registry.try_claim(tid) {
                        continue;
                    }
                    hdebug!("adding thread {}", tid);
                    let s = self.spawner.start_sessions(tid);
                    report.sessions.started += s.started;
                    report.sessions.failed += s.failed;
                    report.threads_added.push(tid);
                }
            }
            Err(e) => {
                self.stats.list_errors += 1;
                hwarn!("thread enumeration skipped: {}", e);
            }
        }

        report.promotion = self.engine.run_cycle(&self.aggregator);
        self.aggregator.reset();

        report.exits_reaped = self.spawner.reap_exits().len();
        self.stats.absorb(&report);
        report
    }

    /// Cycle until `token` is cancelled.
    pub fn run(mut self, token: &CancellationToken) -> ScanStats {
        hinfo!(
            "scanner started: policy {}, interval {:?}",
            self.engine.policy_name(),
            self.interval
        );
        while sleep_unless_cancelled(self.interval, token) {
            self.scan_once();
        }
        hinfo!(
            "scanner stopped after {} cycles, {} promotions",
            self.stats.cycles,
            self.stats.promotions
        );
        self.stats
    }
}

impl<L, A, S> Scanner<L, A, S>
where
    L: ThreadLister + 'static,
    A: HugePageAdvisor + 'static,
    S: SessionSpawner + 'static,
{
    /// Start the scanner on its own blacklisted thread.
    pub fn spawn(self, token: CancellationToken) -> HptResult<ScannerHandle> {
        let registry = Arc::clone(&self.registry);
        let thread_token = token.clone();
        let (tid, handle) = spawn_agent_thread("hpt-scanner".into(), &registry, move || {
            self.run(&thread_token)
        })?;
        Ok(ScannerHandle {
            handle: Some(handle),
            token,
            tid,
        })
    }
}

/// Sleep for `d` in short slices. False if cancelled meanwhile.
fn sleep_unless_cancelled(d: Duration, token: &CancellationToken) -> bool {
    let deadline = Instant::now() + d;
    loop {
        if token.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

/// Handle to a running scanner thread
pub struct ScannerHandle {
    handle: Option<JoinHandle<ScanStats>>,
    token: CancellationToken,
    tid: Tid,
}

impl ScannerHandle {
    /// Kernel id of the scanner thread
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Request shutdown without waiting
    pub fn request_shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Request shutdown and wait for the scanner thread to exit
    pub fn shutdown(mut self) -> ScanStats {
        self.token.cancel();
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                herror!("scanner thread panicked");
                ScanStats::default()
            }
            None => ScanStats::default(),
        }
    }
}

impl Drop for ScannerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
