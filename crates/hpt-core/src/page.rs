//! Page and huge page numbering
//!
//! A page number is an address shifted right by 12 (4 KiB pages), a
//! huge page number is the address shifted right by 21 (2 MiB pages).
//! Both are kept as plain `u64` newtypes so they can be map keys.

use core::fmt;

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

pub const HUGE_PAGE_SHIFT: u32 = 21;
pub const HUGE_PAGE_SIZE: usize = 1 << HUGE_PAGE_SHIFT;

/// 4 KiB pages per 2 MiB huge page (512)
pub const PAGES_PER_HUGE_PAGE: usize = HUGE_PAGE_SIZE / PAGE_SIZE;

/// Number of a 4 KiB virtual page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageNumber(pub u64);

/// Number of a 2 MiB virtual huge page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HugePageNumber(pub u64);

impl PageNumber {
    #[inline]
    pub const fn of(addr: u64) -> Self {
        PageNumber(addr >> PAGE_SHIFT)
    }

    #[inline]
    pub const fn base(self) -> u64 {
        self.0 << PAGE_SHIFT
    }

    /// The huge page containing this page
    #[inline]
    pub const fn huge_page(self) -> HugePageNumber {
        HugePageNumber(self.0 >> (HUGE_PAGE_SHIFT - PAGE_SHIFT))
    }
}

impl HugePageNumber {
    #[inline]
    pub const fn of(addr: u64) -> Self {
        HugePageNumber(addr >> HUGE_PAGE_SHIFT)
    }

    #[inline]
    pub const fn base(self) -> u64 {
        self.0 << HUGE_PAGE_SHIFT
    }

    /// The 512 page-aligned addresses covered by this huge page
    pub fn page_starts(self) -> impl Iterator<Item = u64> {
        let base = self.base();
        (0..PAGES_PER_HUGE_PAGE as u64).map(move |i| base + (i << PAGE_SHIFT))
    }
}

impl fmt::Display for HugePageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.base())
    }
}
