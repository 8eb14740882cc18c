//! # hpt-runtime
//!
//! Linux runtime for hugepagetune.
//!
//! This crate provides:
//! - perf_event bindings and the per-thread `CounterSession`
//! - `/proc/self/task` thread enumeration
//! - `madvise` huge page hints
//! - Consumer supervision and the scanner thread
//! - `AgentConfig` (defaults + `HPT_*` environment overrides)

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod perf_sys;
        pub mod session;
        pub mod threads;
        pub mod advise;
        pub mod supervisor;
        pub mod scanner;
    } else {
        compile_error!("hugepagetune needs Linux perf_event and madvise");
    }
}

pub mod config;

// Re-exports
pub use config::{AgentConfig, SessionConfig};
pub use session::{CounterSession, ExitReason, SessionExit};
pub use threads::{current_tid, spawn_agent_thread, ProcTaskLister};
pub use advise::MadviseAdvisor;
pub use supervisor::{ExitReport, SessionSpawner, SpawnSummary, Supervisor};
pub use scanner::{CycleReport, ScanStats, Scanner, ScannerHandle};
