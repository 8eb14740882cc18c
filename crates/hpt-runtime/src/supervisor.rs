//! Consumer supervision
//!
//! The supervisor opens the counter sessions for a newly claimed thread
//! and hands each one to its own consumer thread. Consumers are detached:
//! the supervisor keeps only weak handles (for diagnostics and targeted
//! cancellation) and receives an `ExitReport` on a lock-free queue when
//! a consumer ends.
//!
//! # Lifecycle
//!
//! ```text
//! start_sessions(tid)
//!   └─ for each EventKind:
//!        CounterSession::open ──(err)──► logged, pair never monitored
//!        spawn_agent_thread ──► consumer blacklists itself
//!                               consume(child token) ──► aggregator.record
//!                               munmap/close, push ExitReport
//! ```
//!
//! A failed session is never retried. Threads that exit make their
//! sessions hang up; those reports are routine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;

use hpt_core::{
    hdebug, hwarn, AccessAggregator, CancellationToken, EventKind, HptError, HptResult,
    ReadinessError, ThreadRegistry, Tid,
};

use crate::config::SessionConfig;
use crate::session::{CounterSession, ExitReason, SessionExit};
use crate::threads::spawn_agent_thread;

/// Result of starting the session set for one thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpawnSummary {
    pub started: u32,
    pub failed: u32,
}

/// Sent by a consumer when it stops
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    /// Monitored thread
    pub tid: Tid,
    pub event: EventKind,
    /// Consumer thread
    pub consumer: Tid,
    pub exit: SessionExit,
}

impl ExitReport {
    /// Monitored thread went away; the normal end of a session.
    pub fn is_routine(&self) -> bool {
        matches!(
            self.exit.reason,
            ExitReason::Cancelled | ExitReason::Readiness(ReadinessError::HangUp)
        )
    }
}

/// Starts per-thread session sets and collects their exits.
///
/// The scanner depends on this trait rather than on `Supervisor` so the
/// cycle logic can run without a PMU.
pub trait SessionSpawner: Send + Sync {
    fn start_sessions(&self, tid: Tid) -> SpawnSummary;

    /// Exit reports received since the last call
    fn reap_exits(&self) -> Vec<ExitReport> {
        Vec::new()
    }
}

impl<T: SessionSpawner + ?Sized> SessionSpawner for Arc<T> {
    fn start_sessions(&self, tid: Tid) -> SpawnSummary {
        (**self).start_sessions(tid)
    }

    fn reap_exits(&self) -> Vec<ExitReport> {
        (**self).reap_exits()
    }
}

/// Weak view of one running consumer
#[derive(Debug)]
struct SessionHandle {
    tid: Tid,
    event: EventKind,
    token: CancellationToken,
}

/// Owns consumer spawning for the agent
pub struct Supervisor {
    registry: Arc<ThreadRegistry>,
    aggregator: Arc<AccessAggregator>,
    root: CancellationToken,
    config: SessionConfig,
    handles: Mutex<Vec<Weak<SessionHandle>>>,
    exits: Arc<SegQueue<ExitReport>>,
    spawned: AtomicUsize,
}

impl Supervisor {
    pub fn new(
        registry: Arc<ThreadRegistry>,
        aggregator: Arc<AccessAggregator>,
        root: CancellationToken,
        config: SessionConfig,
    ) -> Self {
        Self {
            registry,
            aggregator,
            root,
            config,
            handles: Mutex::new(Vec::new()),
            exits: Arc::new(SegQueue::new()),
            spawned: AtomicUsize::new(0),
        }
    }

    /// Open one counter for `(tid, event)` and start its consumer.
    ///
    /// Fails with `Cancelled` once the agent is shutting down.
    pub fn start_session(&self, tid: Tid, event: EventKind) -> HptResult<Tid> {
        self.root.check()?;
        let session = CounterSession::open(event, tid, &self.config)?;

        let handle = Arc::new(SessionHandle {
            tid,
            event,
            token: self.root.child(),
        });
        let weak = Arc::downgrade(&handle);
        let aggregator = Arc::clone(&self.aggregator);
        let exits = Arc::clone(&self.exits);

        let name = format!("hpt-{}", event.short_name());
        let (consumer, _join) = spawn_agent_thread(name, &self.registry, move || {
            run_consumer(session, handle, aggregator, exits)
        })?;

        self.track(weak);
        self.spawned.fetch_add(1, Ordering::Relaxed);
        hdebug!("consumer {} started for {} on tid {}", consumer, event.short_name(), tid);
        Ok(consumer)
    }

    /// Consumers still running
    pub fn live_sessions(&self) -> usize {
        let mut handles = self.lock_handles();
        handles.retain(|w| w.strong_count() > 0);
        handles.len()
    }

    /// Total consumers ever started
    pub fn spawned_sessions(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Monitored thread ids with at least one running consumer
    pub fn monitored_threads(&self) -> Vec<Tid> {
        let mut tids: Vec<Tid> = self
            .lock_handles()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|h| h.tid)
            .collect();
        tids.sort_unstable();
        tids.dedup();
        tids
    }

    /// Cancel every consumer of one monitored thread. Returns how many
    /// were signalled.
    pub fn cancel_thread(&self, tid: Tid) -> usize {
        let mut n = 0;
        for h in self.lock_handles().iter().filter_map(Weak::upgrade) {
            if h.tid == tid {
                hdebug!("cancelling {} consumer of tid {}", h.event.short_name(), tid);
                h.token.cancel();
                n += 1;
            }
        }
        n
    }

    /// Cancel all consumers.
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    /// Wait until no consumer is running. False on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.live_sessions() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Remember a consumer, dropping handles of consumers that ended.
    fn track(&self, handle: Weak<SessionHandle>) {
        let mut handles = self.lock_handles();
        handles.retain(|w| w.strong_count() > 0);
        handles.push(handle);
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, Vec<Weak<SessionHandle>>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionSpawner for Supervisor {
    fn start_sessions(&self, tid: Tid) -> SpawnSummary {
        let mut summary = SpawnSummary::default();
        for event in EventKind::ALL {
            match self.start_session(tid, event) {
                Ok(_) => summary.started += 1,
                Err(HptError::Cancelled) => break,
                Err(e) => {
                    summary.failed += 1;
                    hwarn!("not monitoring {} on tid {}: {}", event.short_name(), tid, e);
                }
            }
        }
        summary
    }

    fn reap_exits(&self) -> Vec<ExitReport> {
        std::iter::from_fn(|| self.exits.pop()).collect()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// Consumer thread body
fn run_consumer(
    mut session: CounterSession,
    handle: Arc<SessionHandle>,
    aggregator: Arc<AccessAggregator>,
    exits: Arc<SegQueue<ExitReport>>,
) {
    let event = handle.event;
    let exit = session.consume(&handle.token, |addr| aggregator.record(event, addr));
    // Release the ring and fd before reporting.
    drop(session);

    let report = ExitReport {
        tid: handle.tid,
        event,
        consumer: crate::threads::current_tid(),
        exit,
    };
    if report.is_routine() {
        hdebug!(
            "consumer for {} on tid {} done: {:?}, {} samples",
            event.short_name(),
            handle.tid,
            report.exit.reason,
            report.exit.stats.samples
        );
    } else {
        hwarn!(
            "consumer for {} on tid {} stopped: {:?}",
            event.short_name(),
            handle.tid,
            report.exit.reason
        );
    }
    exits.push(report);
}
