//! Promotion policy and engine
//!
//! Once per scan cycle the engine asks its policy for a candidate huge
//! page, hints it to the OS, and remembers it so it is never hinted
//! again. Only one policy exists today (`ABOVE_THRESHOLD`): take the
//! busiest not-yet-promoted huge page if its window count is strictly
//! above the threshold.
//!
//! ```text
//! aggregator (huge/all) ──► policy.select() ──► advisor.advise() ──► PromotedSet
//! ```

use std::collections::HashSet;

use crate::aggregator::{AccessAggregator, CounterKind};
use crate::error::HptResult;
use crate::page::{HugePageNumber, HUGE_PAGE_SIZE};
use crate::traits::{Advice, HugePageAdvisor};
use crate::{hdebug, hinfo};

/// Promotion policy selected at start-up (`HPT_MERGE_POLICY`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    AboveThreshold,
}

impl MergePolicy {
    /// Parse a policy name. Unknown or empty names fall back to
    /// `ABOVE_THRESHOLD`, the only defined policy.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "ABOVE_THRESHOLD" => MergePolicy::AboveThreshold,
            _ => MergePolicy::AboveThreshold,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MergePolicy::AboveThreshold => "ABOVE_THRESHOLD",
        }
    }

    /// Build the policy object
    pub fn build(self, threshold: u64) -> Box<dyn PromotionPolicy> {
        match self {
            MergePolicy::AboveThreshold => Box::new(AboveThreshold::new(threshold)),
        }
    }
}

/// How a chosen huge page is hinted (`HPT_HINT_MODE`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintMode {
    /// One 2 MiB hint starting at each of the 512 page starts of the huge
    /// page, 512 calls per promotion. The default.
    Span,
    /// A single 2 MiB hint at the huge page base.
    Single,
}

impl HintMode {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "span" => Some(HintMode::Span),
            "single" => Some(HintMode::Single),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HintMode::Span => "span",
            HintMode::Single => "single",
        }
    }
}

/// A huge page picked by a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub huge_page: HugePageNumber,
    pub count: u64,
}

/// Huge pages already promoted. Grows only.
#[derive(Debug, Default)]
pub struct PromotedSet {
    pages: HashSet<HugePageNumber>,
}

impl PromotedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hpn: HugePageNumber) -> bool {
        self.pages.contains(&hpn)
    }

    /// Returns false if the page was already present
    pub fn insert(&mut self, hpn: HugePageNumber) -> bool {
        self.pages.insert(hpn)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = HugePageNumber> + '_ {
        self.pages.iter().copied()
    }
}

/// Chooses at most one huge page per cycle
pub trait PromotionPolicy: Send {
    fn name(&self) -> &'static str;

    fn select(&self, aggregator: &AccessAggregator, promoted: &PromotedSet) -> Option<Candidate>;
}

/// Busiest unpromoted huge page, if strictly above `threshold`
///
/// Ties on count go to the lowest huge page number so the choice does
/// not depend on map iteration order.
#[derive(Debug, Clone, Copy)]
pub struct AboveThreshold {
    threshold: u64,
}

impl AboveThreshold {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Selection over an explicit list of (huge page, count) pairs
    pub fn select_from<I>(&self, counts: I, promoted: &PromotedSet) -> Option<Candidate>
    where
        I: IntoIterator<Item = (HugePageNumber, u64)>,
    {
        let mut best: Option<Candidate> = None;
        for (hpn, count) in counts {
            if count == 0 || promoted.contains(hpn) {
                continue;
            }
            let better = match best {
                None => true,
                Some(b) => count > b.count || (count == b.count && hpn < b.huge_page),
            };
            if better {
                best = Some(Candidate { huge_page: hpn, count });
            }
        }
        best.filter(|c| c.count > self.threshold)
    }
}

impl PromotionPolicy for AboveThreshold {
    fn name(&self) -> &'static str {
        MergePolicy::AboveThreshold.name()
    }

    fn select(&self, aggregator: &AccessAggregator, promoted: &PromotedSet) -> Option<Candidate> {
        self.select_from(aggregator.huge_page_snapshot(CounterKind::All), promoted)
    }
}

/// Result of one promotion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Promotion {
    pub candidate: Candidate,
    pub hints_issued: u32,
    pub hints_failed: u32,
}

/// Applies a policy and issues hints through an advisor
pub struct PromotionEngine<A: HugePageAdvisor> {
    advisor: A,
    policy: Box<dyn PromotionPolicy>,
    hint_mode: HintMode,
    promoted: PromotedSet,
}

impl<A: HugePageAdvisor> PromotionEngine<A> {
    pub fn new(advisor: A, policy: Box<dyn PromotionPolicy>, hint_mode: HintMode) -> Self {
        Self {
            advisor,
            policy,
            hint_mode,
            promoted: PromotedSet::new(),
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn promoted(&self) -> &PromotedSet {
        &self.promoted
    }

    pub fn advisor(&self) -> &A {
        &self.advisor
    }

    /// One decision step. Does not reset the aggregator.
    pub fn run_cycle(&mut self, aggregator: &AccessAggregator) -> Option<Promotion> {
        let candidate = self.policy.select(aggregator, &self.promoted)?;
        Some(self.promote(candidate))
    }

    fn promote(&mut self, candidate: Candidate) -> Promotion {
        let hpn = candidate.huge_page;
        hinfo!("merging {} with usage count {}", hpn, candidate.count);

        let mut issued = 0u32;
        let mut failed = 0u32;
        let mut hint = |addr: u64| {
            issued += 1;
            if let Err(e) = self.advisor.advise(addr, HUGE_PAGE_SIZE, Advice::Promote) {
                failed += 1;
                hdebug!("hint at {:#x} rejected: {}", addr, e);
            }
        };
        match self.hint_mode {
            HintMode::Span => hpn.page_starts().for_each(&mut hint),
            HintMode::Single => hint(hpn.base()),
        }

        // Marked even when every hint failed, so it is not retried forever.
        self.promoted.insert(hpn);
        Promotion {
            candidate,
            hints_issued: issued,
            hints_failed: failed,
        }
    }

    /// Withdraw the huge page hint for one huge page.
    ///
    /// The promoted set is left as is.
    pub fn demote(&self, hpn: HugePageNumber) -> HptResult<()> {
        self.advisor.advise(hpn.base(), HUGE_PAGE_SIZE, Advice::Demote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HptError;
    use crate::event::EventKind;
    use std::sync::Mutex;

    /// Advisor that records every call; optionally rejects all of them.
    #[derive(Default)]
    pub(crate) struct RecordingAdvisor {
        pub(crate) calls: Mutex<Vec<(u64, usize, Advice)>>,
        pub(crate) reject: bool,
    }

    impl HugePageAdvisor for RecordingAdvisor {
        fn advise(&self, addr: u64, len: usize, advice: Advice) -> HptResult<()> {
            self.calls.lock().unwrap().push((addr, len, advice));
            if self.reject {
                Err(HptError::AdviseFailed(22))
            } else {
                Ok(())
            }
        }
    }

    fn engine(threshold: u64, mode: HintMode) -> PromotionEngine<RecordingAdvisor> {
        PromotionEngine::new(
            RecordingAdvisor::default(),
            MergePolicy::AboveThreshold.build(threshold),
            mode,
        )
    }

    fn fill(agg: &AccessAggregator, hpn: u64, count: u64) {
        for i in 0..count {
            agg.record(EventKind::Load, (hpn << 21) + (i % 512) * 4096);
        }
    }

    #[test]
    fn test_selects_busiest_above_threshold() {
        let policy = AboveThreshold::new(100_000);
        let counts = vec![
            (HugePageNumber(0xA), 50_000),
            (HugePageNumber(0xB), 150_000),
            (HugePageNumber(0xC), 120_000),
        ];
        let pick = policy.select_from(counts, &PromotedSet::new()).unwrap();
        assert_eq!(pick.huge_page, HugePageNumber(0xB));
        assert_eq!(pick.count, 150_000);
    }

    #[test]
    fn test_threshold_is_strict() {
        let policy = AboveThreshold::new(100_000);
        let at = vec![(HugePageNumber(1), 100_000)];
        assert!(policy.select_from(at, &PromotedSet::new()).is_none());
        let above = vec![(HugePageNumber(1), 100_001)];
        assert!(policy.select_from(above, &PromotedSet::new()).is_some());
    }

    #[test]
    fn test_promoted_pages_are_skipped() {
        let policy = AboveThreshold::new(10);
        let mut promoted = PromotedSet::new();
        promoted.insert(HugePageNumber(9));
        let counts = vec![(HugePageNumber(9), 500), (HugePageNumber(3), 50)];
        let pick = policy.select_from(counts.clone(), &promoted).unwrap();
        assert_eq!(pick.huge_page, HugePageNumber(3));

        // Busiest eligible page at or below threshold: nothing, even if others exist
        let counts = vec![(HugePageNumber(9), 500), (HugePageNumber(3), 10), (HugePageNumber(4), 2)];
        assert!(policy.select_from(counts, &promoted).is_none());
    }

    #[test]
    fn test_tie_breaks_to_lowest() {
        let policy = AboveThreshold::new(0);
        let a = vec![(HugePageNumber(7), 5), (HugePageNumber(3), 5), (HugePageNumber(5), 5)];
        let b = vec![(HugePageNumber(5), 5), (HugePageNumber(7), 5), (HugePageNumber(3), 5)];
        let pa = policy.select_from(a, &PromotedSet::new()).unwrap();
        let pb = policy.select_from(b, &PromotedSet::new()).unwrap();
        assert_eq!(pa.huge_page, HugePageNumber(3));
        assert_eq!(pa, pb);
    }

    #[test]
    fn test_promoted_set_grows_only() {
        let mut set = PromotedSet::new();
        assert!(set.is_empty());
        assert!(set.insert(HugePageNumber(1)));
        assert!(!set.insert(HugePageNumber(1)));
        assert!(set.insert(HugePageNumber(2)));
        assert_eq!(set.len(), 2);
        assert!(set.contains(HugePageNumber(1)));
    }

    #[test]
    fn test_promotes_once() {
        let agg = AccessAggregator::new();
        fill(&agg, 0x40, 20);
        let mut eng = engine(10, HintMode::Single);

        let first = eng.run_cycle(&agg).unwrap();
        assert_eq!(first.candidate.huge_page, HugePageNumber(0x40));
        assert!(eng.promoted().contains(HugePageNumber(0x40)));

        // Same counts again: already promoted, nothing else above threshold
        assert!(eng.run_cycle(&agg).is_none());
        assert_eq!(eng.advisor().calls.lock().unwrap().len(), 1);
        assert_eq!(eng.promoted().len(), 1);
    }

    #[test]
    fn test_next_busiest_after_promotion() {
        let agg = AccessAggregator::new();
        fill(&agg, 1, 30);
        fill(&agg, 2, 20);
        let mut eng = engine(10, HintMode::Single);
        assert_eq!(eng.run_cycle(&agg).unwrap().candidate.huge_page, HugePageNumber(1));
        assert_eq!(eng.run_cycle(&agg).unwrap().candidate.huge_page, HugePageNumber(2));
        assert!(eng.run_cycle(&agg).is_none());
        let mut pages: Vec<_> = eng.promoted().iter().collect();
        pages.sort();
        assert_eq!(pages, vec![HugePageNumber(1), HugePageNumber(2)]);
    }

    #[test]
    fn test_span_mode_walks_every_page() {
        let agg = AccessAggregator::new();
        fill(&agg, 3, 11);
        let mut eng = engine(10, HintMode::Span);
        let p = eng.run_cycle(&agg).unwrap();
        assert_eq!(p.hints_issued, 512);
        assert_eq!(p.hints_failed, 0);

        let calls = eng.advisor().calls.lock().unwrap();
        assert_eq!(calls.len(), 512);
        assert_eq!(calls[0], (3 << 21, HUGE_PAGE_SIZE, Advice::Promote));
        assert_eq!(calls[511].0, (3 << 21) + 511 * 4096);
    }

    #[test]
    fn test_failed_hint_still_marks_promoted() {
        let agg = AccessAggregator::new();
        fill(&agg, 6, 11);
        let mut eng = PromotionEngine::new(
            RecordingAdvisor { reject: true, ..Default::default() },
            MergePolicy::AboveThreshold.build(10),
            HintMode::Single,
        );
        let p = eng.run_cycle(&agg).unwrap();
        assert_eq!(p.hints_failed, 1);
        assert!(eng.promoted().contains(HugePageNumber(6)));
        assert!(eng.run_cycle(&agg).is_none());
    }

    #[test]
    fn test_empty_window_does_nothing() {
        let agg = AccessAggregator::new();
        let mut eng = engine(0, HintMode::Span);
        assert!(eng.run_cycle(&agg).is_none());
        assert!(eng.advisor().calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_demote_primitive() {
        let eng = engine(0, HintMode::Single);
        eng.demote(HugePageNumber(2)).unwrap();
        let calls = eng.advisor().calls.lock().unwrap();
        assert_eq!(calls[0], (2 << 21, HUGE_PAGE_SIZE, Advice::Demote));
    }

    #[test]
    fn test_policy_names() {
        assert_eq!(MergePolicy::parse("above_threshold"), MergePolicy::AboveThreshold);
        assert_eq!(MergePolicy::parse("SOMETHING_ELSE"), MergePolicy::AboveThreshold);
        assert_eq!(MergePolicy::AboveThreshold.name(), "ABOVE_THRESHOLD");
        assert_eq!(HintMode::parse("Single"), Some(HintMode::Single));
        assert_eq!(HintMode::parse("bogus"), None);
    }
}
