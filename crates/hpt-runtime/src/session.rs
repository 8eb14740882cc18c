//! Counter session: one sampling counter on one thread
//!
//! Owns the perf fd and its mapped ring. `consume` waits for readiness,
//! drains every available record into a callback, and repeats until the
//! session is cancelled or the fd reports a fatal condition.
//!
//! ```text
//! open:    perf_event_open ──► mmap(1 + N pages) ──► SampleRing
//! consume: reset+enable ──► loop { poll(POLLIN, timeout) ──► drain }
//! drop:    munmap ──► close
//! ```

use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

use hpt_core::ring::CONTROL_PAGE_SIZE;
use hpt_core::{
    encode, hdebug, CancellationToken, CounterError, DrainStats, EventKind, HptError,
    HptResult, ReadinessError, SampleRing, Tid,
};

use crate::config::SessionConfig;
use crate::perf_sys;

/// Why a consumer stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Token cancelled (agent shutdown)
    Cancelled,
    /// Fatal poll condition, usually the monitored thread exiting
    Readiness(ReadinessError),
    /// Counter could not be reset or enabled
    Enable(CounterError),
}

/// Outcome of `CounterSession::consume`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionExit {
    pub reason: ExitReason,
    pub stats: DrainStats,
}

/// Live sampling counter with its mapped ring
pub struct CounterSession {
    fd: OwnedFd,
    base: *mut u8,
    mmap_len: usize,
    ring: SampleRing,
    event: EventKind,
    tid: Tid,
    poll_timeout: Duration,
}

// Safety: the mapping is private to this session and only touched by
// whichever thread currently owns it.
unsafe impl Send for CounterSession {}

impl CounterSession {
    /// Open a disabled counter for `event` on thread `tid` and map its ring.
    ///
    /// On mapping failure the fd is closed before returning.
    pub fn open(event: EventKind, tid: Tid, config: &SessionConfig) -> HptResult<Self> {
        config.validate()?;
        let data_size = config
            .data_size()
            .ok_or(HptError::InvalidConfig("ring size"))?;

        let counter = encode(event.descriptor())?;
        let mut attr =
            perf_sys::raw_address_sampler(counter.raw, config.sample_period, config.wakeup_events);
        let fd = perf_sys::perf_event_open(&mut attr, tid)
            .map_err(|errno| CounterError::Open { event, tid, errno })?;

        let mmap_len = CONTROL_PAGE_SIZE + data_size;
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mmap_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            let errno = nix::errno::Errno::last_raw();
            return Err(CounterError::Map { event, tid, errno }.into());
        }

        let base = ptr as *mut u8;
        // Safety: the kernel mapped a control page followed by data_size
        // bytes of ring, page aligned, and we hold the only reader.
        let ring = unsafe { SampleRing::from_raw(base, data_size) };
        let control = ring.control_snapshot();
        hdebug!(
            "ring for {} on tid {}: version {}, {} KiB, tail {}",
            event.short_name(),
            tid,
            control.version,
            data_size >> 10,
            control.tail
        );

        Ok(Self {
            fd,
            base,
            mmap_len,
            ring,
            event,
            tid,
            poll_timeout: config.poll_timeout,
        })
    }

    pub fn event(&self) -> EventKind {
        self.event
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn ring(&self) -> &SampleRing {
        &self.ring
    }

    /// Zero the counter and start sampling.
    pub fn enable(&self) -> Result<(), CounterError> {
        let fd = self.fd.as_raw_fd();
        perf_sys::reset(fd)
            .and_then(|()| perf_sys::enable(fd))
            .map_err(|errno| self.ioctl_error(errno))
    }

    /// Stop sampling. The ring stays mapped.
    pub fn disable(&self) -> Result<(), CounterError> {
        perf_sys::disable(self.fd.as_raw_fd()).map_err(|errno| self.ioctl_error(errno))
    }

    fn ioctl_error(&self, errno: i32) -> CounterError {
        CounterError::Ioctl {
            event: self.event,
            tid: self.tid,
            errno,
        }
    }

    /// Enable, then consume until cancelled or the fd reports a fatal
    /// condition.
    pub fn consume<F: FnMut(u64)>(&mut self, token: &CancellationToken, on_addr: F) -> SessionExit {
        if let Err(e) = self.enable() {
            return SessionExit {
                reason: ExitReason::Enable(e),
                stats: DrainStats::default(),
            };
        }
        self.pump(token, on_addr)
    }

    /// Wait/drain loop of `consume`, on an already enabled counter.
    ///
    /// Records still in the ring when the monitored thread hangs up are
    /// drained before returning.
    fn pump<F: FnMut(u64)>(&mut self, token: &CancellationToken, mut on_addr: F) -> SessionExit {
        let mut stats = DrainStats::default();
        let reason = loop {
            if token.is_cancelled() {
                let _ = self.disable();
                break ExitReason::Cancelled;
            }
            match wait_readable(self.fd.as_raw_fd(), self.poll_timeout) {
                Ok(_) => {
                    if self.ring.has_pending() {
                        stats.merge(self.ring.drain(&mut on_addr));
                    }
                }
                Err(e) => {
                    if e == ReadinessError::HangUp {
                        stats.merge(self.ring.drain(&mut on_addr));
                    }
                    break ExitReason::Readiness(e);
                }
            }
        };
        SessionExit { reason, stats }
    }
}

impl Drop for CounterSession {
    fn drop(&mut self) {
        if !self.base.is_null() && self.mmap_len > 0 {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.mmap_len);
            }
            self.base = std::ptr::null_mut();
        }
        // fd closes with OwnedFd
    }
}

/// Map poll `revents` to readiness.
///
/// Ok(true) readable, Ok(false) nothing yet. Error bits win over POLLIN.
pub fn classify_revents(revents: libc::c_short) -> Result<bool, ReadinessError> {
    if revents & libc::POLLNVAL != 0 {
        return Err(ReadinessError::InvalidHandle);
    }
    if revents & libc::POLLERR != 0 {
        return Err(ReadinessError::Error);
    }
    if revents & libc::POLLHUP != 0 {
        return Err(ReadinessError::HangUp);
    }
    Ok(revents & libc::POLLIN != 0)
}

/// Wait up to `timeout` for `fd` to become readable.
///
/// EINTR counts as a timeout.
pub fn wait_readable(fd: RawFd, timeout: Duration) -> Result<bool, ReadinessError> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
    let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if ret < 0 {
        let errno = nix::errno::Errno::last();
        if errno == nix::errno::Errno::EINTR {
            return Ok(false);
        }
        return Err(ReadinessError::Poll(errno as i32));
    }
    if ret == 0 {
        return Ok(false);
    }
    classify_revents(pfd.revents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpt_core::ring::{offsets, PERF_RECORD_SAMPLE, SAMPLE_RECORD_SIZE};
    use std::os::unix::io::FromRawFd;
    use std::sync::atomic::{AtomicU64, Ordering};

    const TEST_RING: usize = 4096;

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0 as libc::c_int; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (fds[0], fds[1])
    }

    /// Session whose fd is a pipe read end and whose ring is an anonymous
    /// mapping laid out like a perf buffer. Hang-up is closing the write end.
    fn pipe_session(read_end: RawFd) -> CounterSession {
        let mmap_len = CONTROL_PAGE_SIZE + TEST_RING;
        let p = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mmap_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        assert_ne!(p, libc::MAP_FAILED);
        let base = p as *mut u8;
        CounterSession {
            fd: unsafe { OwnedFd::from_raw_fd(read_end) },
            base,
            mmap_len,
            ring: unsafe { SampleRing::from_raw(base, TEST_RING) },
            event: EventKind::Load,
            tid: 0,
            poll_timeout: Duration::from_millis(10),
        }
    }

    /// Append sample records after the current head and publish them.
    fn publish_samples(session: &CounterSession, addrs: &[u64]) {
        let head_word = unsafe { &*(session.base.add(offsets::DATA_HEAD) as *const AtomicU64) };
        let mut head = head_word.load(Ordering::Relaxed);
        for &addr in addrs {
            let mut rec = [0u8; SAMPLE_RECORD_SIZE as usize];
            rec[0..4].copy_from_slice(&PERF_RECORD_SAMPLE.to_ne_bytes());
            rec[6..8].copy_from_slice(&(SAMPLE_RECORD_SIZE as u16).to_ne_bytes());
            rec[8..16].copy_from_slice(&addr.to_ne_bytes());
            let idx = head as usize & (TEST_RING - 1);
            unsafe {
                std::ptr::copy_nonoverlapping(
                    rec.as_ptr(),
                    session.base.add(CONTROL_PAGE_SIZE + idx),
                    rec.len(),
                );
            }
            head += SAMPLE_RECORD_SIZE;
        }
        head_word.store(head, Ordering::Release);
    }

    #[test]
    fn test_hangup_drains_what_is_left() {
        let (r, w) = pipe();
        let mut session = pipe_session(r);
        publish_samples(&session, &[0x1000, 0x2000, 0x3000]);
        unsafe { libc::close(w) };

        let mut seen = Vec::new();
        let exit = session.pump(&CancellationToken::new(), |a| seen.push(a));
        assert_eq!(exit.reason, ExitReason::Readiness(ReadinessError::HangUp));
        assert_eq!(exit.stats.samples, 3);
        assert_eq!(seen, vec![0x1000, 0x2000, 0x3000]);
        assert!(!session.ring().has_pending());
    }

    #[test]
    fn test_timeout_with_pending_records_drains() {
        let (r, w) = pipe();
        let mut session = pipe_session(r);
        publish_samples(&session, &[0x4000]);

        // Nothing ever becomes readable; the records must still be seen.
        let token = CancellationToken::new();
        let stop = token.clone();
        let mut seen = Vec::new();
        let exit = session.pump(&token, |a| {
            seen.push(a);
            stop.cancel();
        });
        assert_eq!(exit.reason, ExitReason::Cancelled);
        assert_eq!(exit.stats.samples, 1);
        assert_eq!(seen, vec![0x4000]);
        unsafe { libc::close(w) };
    }

    #[test]
    fn test_cancelled_session_stops_before_waiting() {
        let (r, w) = pipe();
        let mut session = pipe_session(r);
        publish_samples(&session, &[0x5000]);

        let token = CancellationToken::new();
        token.cancel();
        let mut seen = Vec::new();
        let exit = session.pump(&token, |a| seen.push(a));
        assert_eq!(exit.reason, ExitReason::Cancelled);
        assert_eq!(exit.stats, DrainStats::default());
        assert!(seen.is_empty());
        unsafe { libc::close(w) };
    }

    #[test]
    fn test_consume_reports_enable_failure() {
        let (r, w) = pipe();
        let mut session = pipe_session(r);
        publish_samples(&session, &[0x6000]);

        let mut seen = Vec::new();
        let exit = session.consume(&CancellationToken::new(), |a| seen.push(a));
        assert!(matches!(
            exit.reason,
            ExitReason::Enable(CounterError::Ioctl { event: EventKind::Load, tid: 0, .. })
        ));
        assert!(seen.is_empty());
        unsafe { libc::close(w) };
    }

    #[test]
    fn test_open_rejects_oversized_ring() {
        let config = SessionConfig { buffer_pages: 1 << 52, ..SessionConfig::default() };
        let r = CounterSession::open(EventKind::Load, 0, &config);
        assert!(matches!(r, Err(HptError::InvalidConfig(_))));
    }

    #[test]
    fn test_classify_revents() {
        assert_eq!(classify_revents(0), Ok(false));
        assert_eq!(classify_revents(libc::POLLIN), Ok(true));
        assert_eq!(classify_revents(libc::POLLIN | libc::POLLHUP), Err(ReadinessError::HangUp));
        assert_eq!(classify_revents(libc::POLLERR), Err(ReadinessError::Error));
        assert_eq!(classify_revents(libc::POLLNVAL), Err(ReadinessError::InvalidHandle));
    }

    #[test]
    fn test_wait_timeout_then_readable() {
        let (r, w) = pipe();
        assert_eq!(wait_readable(r, Duration::from_millis(10)), Ok(false));

        let byte = 1u8;
        assert_eq!(unsafe { libc::write(w, &byte as *const u8 as *const libc::c_void, 1) }, 1);
        assert_eq!(wait_readable(r, Duration::from_millis(1000)), Ok(true));

        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn test_wait_hangup() {
        let (r, w) = pipe();
        unsafe { libc::close(w) };
        assert_eq!(wait_readable(r, Duration::from_millis(1000)), Err(ReadinessError::HangUp));
        unsafe { libc::close(r) };
    }

    #[test]
    fn test_open_bad_tid_fails_cleanly() {
        // No such thread (or no PMU / permission): open must fail, not panic.
        let config = SessionConfig { buffer_pages: 1, ..SessionConfig::default() };
        let err = CounterSession::open(EventKind::Load, i32::MAX, &config).err();
        assert!(err.is_some());
    }
}
