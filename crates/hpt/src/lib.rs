//! # hpt - hugepagetune
//!
//! In-process agent that samples memory accesses through hardware
//! counters and asks the kernel to back the hottest 2 MiB regions with
//! huge pages.
//!
//! ## Quick Start
//!
//! ```ignore
//! use hpt::{Agent, AgentConfig};
//!
//! fn main() -> hpt::HptResult<()> {
//!     let agent = Agent::start(AgentConfig::from_env())?;
//!     run_workload();
//!     let stats = agent.shutdown();
//!     eprintln!("{} promotions", stats.promotions);
//!     Ok(())
//! }
//! ```
//!
//! Built with feature `preload`, the cdylib starts a process-wide agent
//! from its static constructor, so `LD_PRELOAD=libhpt.so ./app` works
//! without touching the application.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Scanner thread                        │
//! │  /proc/self/task ──► claim ──► Supervisor::start_sessions│
//! │  every interval: policy ──► madvise ──► reset counters   │
//! └──────────────────────────────────────────────────────────┘
//!            │ 4 sessions per thread            ▲
//!            ▼                                  │ snapshot
//!    ┌──────────────┐   record(kind, addr)  ┌──────────────────┐
//!    │  Consumer    │ ────────────────────► │ AccessAggregator │
//!    │  threads     │                       │ 6 x 2 counters   │
//!    └──────────────┘                       └──────────────────┘
//!            ▲
//!            │ perf sample ring (mmap)
//!    ┌──────────────┐
//!    │  PMU / kernel│
//!    └──────────────┘
//! ```

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

pub use hpt_core::*;
pub use hpt_runtime::{
    AgentConfig, CycleReport, ExitReport, MadviseAdvisor, ProcTaskLister, ScanStats,
    SessionConfig, Supervisor,
};
pub use hpt_runtime::config;

use hpt_core::{hinfo, hwarn};
use hpt_runtime::{Scanner, ScannerHandle};

/// A running agent: one scanner thread plus its consumers.
///
/// Dropping the agent cancels everything without waiting; `shutdown`
/// also joins the scanner.
pub struct Agent {
    config: AgentConfig,
    root: CancellationToken,
    registry: Arc<ThreadRegistry>,
    aggregator: Arc<AccessAggregator>,
    supervisor: Arc<Supervisor>,
    scanner: Option<ScannerHandle>,
}

impl Agent {
    /// Validate `config` and start the scanner.
    pub fn start(config: AgentConfig) -> HptResult<Self> {
        hprint::init();
        if config.debug && !hprint::level_enabled(hprint::LogLevel::Debug) {
            hprint::set_log_level(hprint::LogLevel::Debug);
        }
        config.validate()?;
        if config.debug {
            config.print();
        }

        let root = CancellationToken::new();
        let registry = Arc::new(ThreadRegistry::new());
        let aggregator = Arc::new(AccessAggregator::new());
        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&registry),
            Arc::clone(&aggregator),
            root.child(),
            config.session_config(),
        ));

        let scanner = Scanner::new(
            &config,
            ProcTaskLister::new(),
            MadviseAdvisor::new(),
            Arc::clone(&supervisor),
            Arc::clone(&aggregator),
            Arc::clone(&registry),
        );
        hinfo!("current merge policy: {}", config.merge_policy.name());
        let scanner = scanner.spawn(root.child())?;

        Ok(Self {
            config,
            root,
            registry,
            aggregator,
            supervisor,
            scanner: Some(scanner),
        })
    }

    /// `start` with `AgentConfig::from_env()`
    pub fn start_from_env() -> HptResult<Self> {
        Self::start(AgentConfig::from_env())
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Counters for the current window
    pub fn aggregator(&self) -> &Arc<AccessAggregator> {
        &self.aggregator
    }

    pub fn registry(&self) -> &Arc<ThreadRegistry> {
        &self.registry
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Kernel id of the scanner thread
    pub fn scanner_tid(&self) -> Option<Tid> {
        self.scanner.as_ref().map(ScannerHandle::tid)
    }

    pub fn live_sessions(&self) -> usize {
        self.supervisor.live_sessions()
    }

    /// Stop the scanner and every consumer.
    ///
    /// Waits for the scanner to finish its cycle and, bounded, for the
    /// consumers to release their rings.
    pub fn shutdown(mut self) -> ScanStats {
        self.root.cancel();
        let stats = self.scanner.take().map(ScannerHandle::shutdown).unwrap_or_default();
        let grace = self.config.poll_timeout * 4 + Duration::from_millis(100);
        if !self.supervisor.wait_idle(grace) {
            hwarn!("{} consumers still running at shutdown", self.supervisor.live_sessions());
        }
        stats
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

// ── Process-wide agent ──

fn global() -> &'static Mutex<Option<Agent>> {
    static GLOBAL: OnceLock<Mutex<Option<Agent>>> = OnceLock::new();
    GLOBAL.get_or_init(|| Mutex::new(None))
}

/// Start the process-wide agent from the environment. No-op if running.
pub fn start_global() -> HptResult<()> {
    let mut slot = global().lock().unwrap_or_else(|e| e.into_inner());
    if slot.is_none() {
        *slot = Some(Agent::start_from_env()?);
    }
    Ok(())
}

/// Stop the process-wide agent, if any.
pub fn shutdown_global() -> Option<ScanStats> {
    let agent = global().lock().unwrap_or_else(|e| e.into_inner()).take();
    agent.map(Agent::shutdown)
}

pub fn global_running() -> bool {
    global().lock().unwrap_or_else(|e| e.into_inner()).is_some()
}

#[cfg(feature = "preload")]
mod preload {
    // Runs when the shared object is loaded, before the host's main.
    #[used]
    #[link_section = ".init_array"]
    static HPT_PRELOAD_INIT: extern "C" fn() = hpt_preload_init;

    extern "C" fn hpt_preload_init() {
        let started = std::panic::catch_unwind(crate::start_global);
        match started {
            Ok(Ok(())) => {}
            Ok(Err(e)) => hpt_core::herror!("agent not started: {}", e),
            Err(_) => hpt_core::herror!("agent start panicked"),
        }
    }
}
