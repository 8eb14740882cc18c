//! Consumer side of the perf sample ring
//!
//! The kernel exposes each sampling counter as one mmap'd region:
//!
//! ```text
//! Page 0:          perf_event_mmap_page { version, compat_version, lock, ..., data_head, data_tail, ... }
//! Pages 1..N:      data area, 2^k pages of variable-length records
//! ```
//!
//! `data_head` and `data_tail` are u64 byte offsets that only ever grow.
//! The actual byte index is `value & (data_size - 1)`.
//!
//! # Protocol (single producer, single consumer)
//!
//! - **Producer (kernel):** writes records, then advances `data_head`.
//! - **Consumer (this type):** loads `data_head` with Acquire, walks every
//!   record between its cursor and that head, then stores the new cursor
//!   into `data_tail` with Release so the kernel may reuse the space.
//!
//! Nothing else touches `data_tail`. A `SampleRing` is owned by exactly
//! one consumer thread.
//!
//! # Records
//!
//! Every record starts with `perf_event_header { type: u32, misc: u16,
//! size: u16 }`. With `sample_type = PERF_SAMPLE_ADDR` a sample record
//! is that header followed by one u64 data address. A record may straddle
//! the end of the data area; it is copied out in two pieces.

use std::mem::{offset_of, size_of};
use std::ptr;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

use perf_event_open_sys::bindings::{self, perf_event_header, perf_event_mmap_page};

/// Size of the control page preceding the data area
pub const CONTROL_PAGE_SIZE: usize = 4096;

const _: () = assert!(size_of::<perf_event_mmap_page>() <= CONTROL_PAGE_SIZE);

pub const PERF_RECORD_SAMPLE: u32 = bindings::PERF_RECORD_SAMPLE as u32;

pub const HEADER_SIZE: u64 = size_of::<perf_event_header>() as u64;

/// Header plus one u64 address
pub const SAMPLE_RECORD_SIZE: u64 = HEADER_SIZE + 8;

/// Control page fields the consumer touches
pub mod offsets {
    use super::{offset_of, perf_event_mmap_page};

    pub const VERSION: usize = offset_of!(perf_event_mmap_page, version);
    pub const LOCK: usize = offset_of!(perf_event_mmap_page, lock);
    pub const DATA_HEAD: usize = offset_of!(perf_event_mmap_page, data_head);
    pub const DATA_TAIL: usize = offset_of!(perf_event_mmap_page, data_tail);
}

/// Decoded `perf_event_header`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub kind: u32,
    pub misc: u16,
    pub size: u16,
}

impl From<perf_event_header> for RecordHeader {
    fn from(h: perf_event_header) -> Self {
        Self {
            kind: h.type_,
            misc: h.misc,
            size: h.size,
        }
    }
}

/// Outcome of one `drain` pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Sample records handed to the callback
    pub samples: u64,
    /// Sample records with a null address
    pub null_addrs: u64,
    /// Non-sample records (LOST, THROTTLE, ...)
    pub other: u64,
    /// Passes cut short by a header with an impossible size
    pub malformed: u64,
}

impl DrainStats {
    pub fn merge(&mut self, other: DrainStats) {
        self.samples += other.samples;
        self.null_addrs += other.null_addrs;
        self.other += other.other;
        self.malformed += other.malformed;
    }
}

/// Consistent read of control page fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSnapshot {
    pub version: u32,
    pub lock: u32,
    pub head: u64,
    pub tail: u64,
}

/// Reader over one mmap'd perf ring
pub struct SampleRing {
    /// Start of the control page.
    control: *mut u8,
    /// Start of the data area (control + 4096).
    data: *const u8,
    /// Data area size in bytes (power of 2).
    data_size: u64,
    /// Local cursor; equals the last value published to data_tail.
    tail: u64,
}

// Safety: the ring is owned by one consumer thread; the only shared
// words are data_head/data_tail, accessed through atomics.
unsafe impl Send for SampleRing {}

impl SampleRing {
    /// Wrap an mmap'd perf region.
    ///
    /// # Safety
    /// - `base` must point to `CONTROL_PAGE_SIZE + data_size` mapped, writable
    ///   bytes laid out as a perf_event_mmap_page followed by the data area,
    ///   aligned to at least 8 bytes.
    /// - The mapping must outlive the returned ring.
    /// - No other consumer may exist for the same mapping.
    pub unsafe fn from_raw(base: *mut u8, data_size: usize) -> Self {
        assert!(data_size.is_power_of_two(), "ring data size must be power of 2");
        let mut ring = Self {
            control: base,
            data: base.add(CONTROL_PAGE_SIZE),
            data_size: data_size as u64,
            tail: 0,
        };
        ring.tail = ring.control_snapshot().tail;
        ring
    }

    #[inline]
    fn head_word(&self) -> &AtomicU64 {
        unsafe { &*(self.control.add(offsets::DATA_HEAD) as *const AtomicU64) }
    }

    #[inline]
    fn tail_word(&self) -> &AtomicU64 {
        unsafe { &*(self.control.add(offsets::DATA_TAIL) as *const AtomicU64) }
    }

    #[inline]
    fn lock_word(&self) -> &AtomicU32 {
        unsafe { &*(self.control.add(offsets::LOCK) as *const AtomicU32) }
    }

    /// Producer position, loaded with Acquire
    #[inline]
    pub fn head(&self) -> u64 {
        self.head_word().load(Ordering::Acquire)
    }

    /// Consumer position (last published tail)
    #[inline]
    pub fn tail(&self) -> u64 {
        self.tail
    }

    #[inline]
    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    /// True when the producer has published records past our cursor
    #[inline]
    pub fn has_pending(&self) -> bool {
        self.head() != self.tail
    }

    /// Copy `out.len()` bytes starting at ring offset `pos`, across the wrap.
    fn read_bytes(&self, pos: u64, out: &mut [u8]) {
        let idx = (pos & (self.data_size - 1)) as usize;
        let first = out.len().min(self.data_size as usize - idx);
        unsafe {
            ptr::copy_nonoverlapping(self.data.add(idx), out.as_mut_ptr(), first);
            if first < out.len() {
                ptr::copy_nonoverlapping(self.data, out.as_mut_ptr().add(first), out.len() - first);
            }
        }
    }

    fn read_header(&self, pos: u64) -> RecordHeader {
        let mut buf = [0u8; HEADER_SIZE as usize];
        self.read_bytes(pos, &mut buf);
        // Safety: buf is exactly one header; read_unaligned has no alignment needs.
        unsafe { ptr::read_unaligned(buf.as_ptr() as *const perf_event_header) }.into()
    }

    fn read_u64(&self, pos: u64) -> u64 {
        let mut buf = [0u8; 8];
        self.read_bytes(pos, &mut buf);
        u64::from_ne_bytes(buf)
    }

    /// Consume every record published since the last pass.
    ///
    /// Calls `on_addr` for each sample record with a non-null address,
    /// in publication order, then publishes the new tail. Calling again
    /// without the producer moving head does nothing.
    pub fn drain<F: FnMut(u64)>(&mut self, mut on_addr: F) -> DrainStats {
        let mut stats = DrainStats::default();
        let head = self.head();
        if head == self.tail {
            return stats;
        }

        let mut pos = self.tail;
        while pos != head {
            let remaining = head.wrapping_sub(pos);
            if remaining < HEADER_SIZE {
                stats.malformed += 1;
                pos = head;
                break;
            }
            let hdr = self.read_header(pos);
            let size = hdr.size as u64;
            if size < HEADER_SIZE || size > remaining {
                // A zero or oversized length would stall or overrun the walk.
                stats.malformed += 1;
                pos = head;
                break;
            }

            if hdr.kind == PERF_RECORD_SAMPLE && size >= SAMPLE_RECORD_SIZE {
                let addr = self.read_u64(pos.wrapping_add(HEADER_SIZE));
                if addr != 0 {
                    on_addr(addr);
                    stats.samples += 1;
                } else {
                    stats.null_addrs += 1;
                }
            } else {
                stats.other += 1;
            }
            pos = pos.wrapping_add(size);
        }

        self.tail = pos;
        self.tail_word().store(pos, Ordering::Release);
        stats
    }

    /// Read control page fields under the page's seqlock.
    ///
    /// Retries while the kernel holds the lock (odd value) or bumped it
    /// during the read.
    pub fn control_snapshot(&self) -> ControlSnapshot {
        loop {
            let seq = self.lock_word().load(Ordering::Acquire);
            if seq & 1 != 0 {
                std::hint::spin_loop();
                continue;
            }
            fence(Ordering::Acquire);
            let version = unsafe {
                ptr::read_volatile(self.control.add(offsets::VERSION) as *const u32)
            };
            let head = self.head_word().load(Ordering::Relaxed);
            let tail = self.tail_word().load(Ordering::Relaxed);
            fence(Ordering::Acquire);
            if self.lock_word().load(Ordering::Relaxed) == seq {
                return ControlSnapshot { version, lock: seq, head, tail };
            }
        }
    }
}

impl std::fmt::Debug for SampleRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleRing")
            .field("data_size", &self.data_size)
            .field("tail", &self.tail)
            .finish()
    }
}
