//! OS seams used by the core
//!
//! The promotion engine and the scanner talk to the OS only through
//! these traits. `hpt-runtime` provides the Linux implementations
//! (`MadviseAdvisor`, `ProcTaskLister`); tests plug in recorders.

use crate::error::HptResult;
use crate::tracking::Tid;

/// Direction of a large-page hint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advice {
    /// Back the range with huge pages (`MADV_HUGEPAGE`)
    Promote,
    /// Stop backing the range with huge pages (`MADV_NOHUGEPAGE`)
    Demote,
}

/// Advises the OS about large-page backing.
///
/// **Contract:**
/// - Advisory only. `Ok` does not mean the range became a huge page.
/// - Must not block for long; it runs on the scanner thread.
pub trait HugePageAdvisor: Send + Sync {
    fn advise(&self, addr: u64, len: usize, advice: Advice) -> HptResult<()>;
}

/// Lists the live threads of the current process.
///
/// No ordering guarantee on the returned ids.
pub trait ThreadLister: Send + Sync {
    fn list_threads(&self) -> HptResult<Vec<Tid>>;
}
