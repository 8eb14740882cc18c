//! Concurrent page access counters
//!
//! Twelve counter tables: six counter kinds at 4 KiB granularity and the
//! same six at 2 MiB granularity. Every consumer thread writes into them
//! concurrently; the promotion step reads them once per scan cycle.
//!
//! # Concurrency
//!
//! Tables are `DashMap<u64, AtomicU64>`. The common case (key already
//! present) takes a shard read lock and does a relaxed `fetch_add`. A
//! first sighting goes through `entry().or_insert_with()`, which holds
//! the shard write lock across lookup and insert, so two writers racing
//! on a brand-new key both land their increment.
//!
//! Reads are best-effort snapshots: a reader iterating a table while
//! consumers keep writing sees some mix of before and after. That is
//! fine for a statistical signal and nothing relies on more.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::event::EventKind;
use crate::page::{HugePageNumber, PageNumber};

/// Which counter a sample contributes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKind {
    All = 0,
    Read = 1,
    Write = 2,
    AllTlbMiss = 3,
    ReadTlbMiss = 4,
    WriteTlbMiss = 5,
}

impl CounterKind {
    pub const COUNT: usize = 6;

    pub const ALL: [CounterKind; Self::COUNT] = [
        CounterKind::All,
        CounterKind::Read,
        CounterKind::Write,
        CounterKind::AllTlbMiss,
        CounterKind::ReadTlbMiss,
        CounterKind::WriteTlbMiss,
    ];

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }
}

/// Key granularity of a counter table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Page,
    HugePage,
}

/// Counters bumped by one sample of the given event kind
///
/// Every sample lands in `All` and in exactly one of `Read`/`Write`.
/// TLB-miss samples additionally land in their directional miss
/// counter and in `AllTlbMiss`.
pub const fn classify(kind: EventKind) -> &'static [CounterKind] {
    match kind {
        EventKind::Load => &[CounterKind::All, CounterKind::Read],
        EventKind::Store => &[CounterKind::All, CounterKind::Write],
        EventKind::TlbMissLoad => &[
            CounterKind::All,
            CounterKind::Read,
            CounterKind::ReadTlbMiss,
            CounterKind::AllTlbMiss,
        ],
        EventKind::TlbMissStore => &[
            CounterKind::All,
            CounterKind::Write,
            CounterKind::WriteTlbMiss,
            CounterKind::AllTlbMiss,
        ],
    }
}

type CounterTable = DashMap<u64, AtomicU64>;

#[inline]
fn bump(table: &CounterTable, key: u64) {
    if let Some(counter) = table.get(&key) {
        counter.fetch_add(1, Ordering::Relaxed);
        return;
    }
    table
        .entry(key)
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

/// Page and huge page access counters shared by all consumers
pub struct AccessAggregator {
    pages: [CounterTable; CounterKind::COUNT],
    huge_pages: [CounterTable; CounterKind::COUNT],
}

impl AccessAggregator {
    pub fn new() -> Self {
        Self {
            pages: std::array::from_fn(|_| DashMap::new()),
            huge_pages: std::array::from_fn(|_| DashMap::new()),
        }
    }

    /// Count one sampled access
    ///
    /// Safe to call from any number of threads at once.
    pub fn record(&self, kind: EventKind, addr: u64) {
        let page = PageNumber::of(addr).0;
        let huge = HugePageNumber::of(addr).0;
        for counter in classify(kind) {
            bump(&self.pages[counter.index()], page);
            bump(&self.huge_pages[counter.index()], huge);
        }
    }

    fn table(&self, granularity: Granularity, counter: CounterKind) -> &CounterTable {
        match granularity {
            Granularity::Page => &self.pages[counter.index()],
            Granularity::HugePage => &self.huge_pages[counter.index()],
        }
    }

    /// Current value of one counter (0 when absent)
    pub fn count(&self, granularity: Granularity, counter: CounterKind, key: u64) -> u64 {
        self.table(granularity, counter)
            .get(&key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    #[inline]
    pub fn page_count(&self, counter: CounterKind, page: PageNumber) -> u64 {
        self.count(Granularity::Page, counter, page.0)
    }

    #[inline]
    pub fn huge_page_count(&self, counter: CounterKind, hpn: HugePageNumber) -> u64 {
        self.count(Granularity::HugePage, counter, hpn.0)
    }

    /// Number of distinct keys in one table
    pub fn len(&self, granularity: Granularity, counter: CounterKind) -> usize {
        self.table(granularity, counter).len()
    }

    /// True when no table holds any key
    pub fn is_empty(&self) -> bool {
        self.pages.iter().chain(self.huge_pages.iter()).all(|t| t.is_empty())
    }

    /// Best-effort snapshot of a huge page table
    pub fn huge_page_snapshot(&self, counter: CounterKind) -> Vec<(HugePageNumber, u64)> {
        self.huge_pages[counter.index()]
            .iter()
            .map(|e| (HugePageNumber(*e.key()), e.value().load(Ordering::Relaxed)))
            .collect()
    }

    /// Clear all twelve tables for the next observation window
    pub fn reset(&self) {
        for table in self.pages.iter().chain(self.huge_pages.iter()) {
            table.clear();
        }
    }
}

impl Default for AccessAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AccessAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessAggregator")
            .field("pages", &self.pages[CounterKind::All.index()].len())
            .field("huge_pages", &self.huge_pages[CounterKind::All.index()].len())
            .finish()
    }
}
