//! Thread bookkeeping for the scanner
//!
//! Two append-only sets, each behind its own mutex:
//!
//! - `blacklist`: threads that belong to the agent (scanner, consumers).
//!   Monitoring them would sample the agent's own ring walks and feed
//!   the counters with their own bookkeeping.
//! - `monitored`: observed threads that already have a session set.
//!
//! A thread becomes a session target only through `try_claim`, which
//! consults the blacklist and inserts into `monitored` under the
//! respective locks, so at most one session set exists per thread and
//! blacklisted ids are never claimed.

use std::collections::HashSet;
use std::sync::Mutex;

/// Kernel thread id
pub type Tid = i32;

#[derive(Debug, Default)]
pub struct ThreadRegistry {
    blacklist: Mutex<HashSet<Tid>>,
    monitored: Mutex<HashSet<Tid>>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a thread as agent-internal. Returns false if already present.
    pub fn blacklist(&self, tid: Tid) -> bool {
        let mut set = self.blacklist.lock().unwrap_or_else(|e| e.into_inner());
        set.insert(tid)
    }

    pub fn is_blacklisted(&self, tid: Tid) -> bool {
        let set = self.blacklist.lock().unwrap_or_else(|e| e.into_inner());
        set.contains(&tid)
    }

    pub fn is_monitored(&self, tid: Tid) -> bool {
        let set = self.monitored.lock().unwrap_or_else(|e| e.into_inner());
        set.contains(&tid)
    }

    /// Claim a thread for monitoring.
    ///
    /// True exactly once per non-blacklisted tid; the caller must then
    /// start its sessions.
    pub fn try_claim(&self, tid: Tid) -> bool {
        if self.is_blacklisted(tid) {
            return false;
        }
        let mut set = self.monitored.lock().unwrap_or_else(|e| e.into_inner());
        set.insert(tid)
    }

    pub fn blacklisted_count(&self) -> usize {
        self.blacklist.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn monitored_count(&self) -> usize {
        self.monitored.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
