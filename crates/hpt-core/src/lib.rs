//! # hpt-core
//!
//! Platform-agnostic core of hugepagetune, the in-process agent that
//! samples memory accesses through hardware counters and promotes the
//! hottest 2 MiB regions to huge pages.
//!
//! This crate contains no syscalls; it uses the perf uapi bindings only
//! for the control page and record layouts. The Linux side (perf sessions, the
//! thread scanner, madvise) lives in `hpt-runtime`.
//!
//! ## Modules
//!
//! - `event` - Sampled event kinds and their PMU encodings
//! - `page` - 4 KiB / 2 MiB page numbering
//! - `ring` - Consumer side of the perf sample ring
//! - `aggregator` - Concurrent per-page access counters
//! - `promotion` - Promotion policy, promoted set, engine
//! - `tracking` - Blacklisted / monitored thread sets
//! - `traits` - OS seams (hint, thread listing)
//! - `cancel` - Cancellation token tree
//! - `error` - Error types
//! - `hprint` - Leveled stderr logging macros
//! - `env` - Environment variable utilities

pub mod event;
pub mod page;
pub mod ring;
pub mod aggregator;
pub mod promotion;
pub mod tracking;
pub mod traits;
pub mod cancel;
pub mod error;
pub mod hprint;
pub mod env;

// Re-exports for convenience
pub use event::{encode, CounterConfig, EventKind};
pub use page::{HugePageNumber, PageNumber};
pub use ring::{DrainStats, SampleRing};
pub use aggregator::{AccessAggregator, CounterKind, Granularity};
pub use promotion::{
    AboveThreshold, Candidate, HintMode, MergePolicy, PromotedSet, Promotion, PromotionEngine,
    PromotionPolicy,
};
pub use tracking::{ThreadRegistry, Tid};
pub use traits::{Advice, HugePageAdvisor, ThreadLister};
pub use cancel::CancellationToken;
pub use error::{CounterError, HptError, HptResult, ReadinessError};
pub use env::{env_get, env_get_opt, env_get_str, env_is_set};
