//! Cancellation tokens for agent threads
//!
//! The scanner and every consumer poll a token between blocking waits.
//! Tokens form a tree: the agent holds the root and each consumer gets a
//! child, so cancelling the root stops everything while one session can
//! still be stopped on its own.
//!
//! A token carries its own flag plus the flags of all its ancestors, so
//! a check is a short scan over atomics with no pointer chasing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{HptError, HptResult};

#[derive(Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    /// Ancestor flags, nearest first
    lineage: Arc<[Arc<AtomicBool>]>,
}

impl CancellationToken {
    /// A fresh root
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            lineage: Vec::new().into(),
        }
    }

    /// Token cancelled by this one (and its ancestors), but not the
    /// other way round.
    pub fn child(&self) -> Self {
        let lineage: Vec<_> = std::iter::once(Arc::clone(&self.flag))
            .chain(self.lineage.iter().cloned())
            .collect();
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            lineage: lineage.into(),
        }
    }

    /// Cancelled here or on any ancestor
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        std::iter::once(&self.flag)
            .chain(self.lineage.iter())
            .any(|f| f.load(Ordering::Acquire))
    }

    /// Cancel this token and every descendant
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Number of ancestors (0 for a root)
    pub fn depth(&self) -> usize {
        self.lineage.len()
    }

    /// `Err(Cancelled)` once cancellation was requested
    #[inline]
    pub fn check(&self) -> HptResult<()> {
        match self.is_cancelled() {
            true => Err(HptError::Cancelled),
            false => Ok(()),
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CancellationToken(depth={}, cancelled={})",
            self.depth(),
            self.is_cancelled()
        )
    }
}
