//! madvise-backed huge page hints

use std::ptr::NonNull;

use nix::sys::mman::{madvise, MmapAdvise};

use hpt_core::{Advice, HptError, HptResult, HugePageAdvisor};

/// Issues `MADV_HUGEPAGE` / `MADV_NOHUGEPAGE` on the calling process.
///
/// Purely advisory. Ranges that are not mapped fail with ENOMEM and are
/// left to the caller to ignore.
#[derive(Debug, Clone, Copy, Default)]
pub struct MadviseAdvisor;

impl MadviseAdvisor {
    pub fn new() -> Self {
        Self
    }
}

impl HugePageAdvisor for MadviseAdvisor {
    fn advise(&self, addr: u64, len: usize, advice: Advice) -> HptResult<()> {
        let ptr = NonNull::new(addr as usize as *mut libc::c_void)
            .ok_or(HptError::AdviseFailed(libc::EINVAL))?;
        let flag = match advice {
            Advice::Promote => MmapAdvise::MADV_HUGEPAGE,
            Advice::Demote => MmapAdvise::MADV_NOHUGEPAGE,
        };
        // Safety: hint-only advice values; they never change the contents
        // of the range.
        unsafe { madvise(ptr, len, flag) }.map_err(|e| HptError::AdviseFailed(e as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpt_core::page::HUGE_PAGE_SIZE;

    #[test]
    fn test_null_is_rejected() {
        let r = MadviseAdvisor.advise(0, HUGE_PAGE_SIZE, Advice::Promote);
        assert_eq!(r, Err(HptError::AdviseFailed(libc::EINVAL)));
    }

    #[test]
    fn test_demote_on_mapped_memory() {
        // MADV_NOHUGEPAGE is accepted on any anonymous mapping, THP or not.
        let len = 2 * HUGE_PAGE_SIZE;
        let p = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        assert_ne!(p, libc::MAP_FAILED);
        let r = MadviseAdvisor.advise(p as u64, HUGE_PAGE_SIZE, Advice::Demote);
        unsafe { libc::munmap(p, len) };
        assert!(r.is_ok());
    }
}
