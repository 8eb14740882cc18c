//! Thin layer over `perf-event-open-sys`.
//!
//! Builds the sampling attr the agent uses and turns the raw `-1`/errno
//! returns of the syscall and its ioctls into `Result`s.

use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};

use perf_event_open_sys as sys;
use sys::bindings::{perf_event_attr, PERF_FLAG_FD_CLOEXEC, PERF_SAMPLE_ADDR, PERF_TYPE_RAW};

/// Raw sampling counter for the data address of each sampled access.
///
/// Created disabled, user space only, `precise_ip = 1`.
pub fn raw_address_sampler(config: u64, sample_period: u64, wakeup_events: u32) -> perf_event_attr {
    let mut attr = perf_event_attr {
        size: std::mem::size_of::<perf_event_attr>() as u32,
        type_: PERF_TYPE_RAW,
        config,
        sample_type: PERF_SAMPLE_ADDR as u64,
        ..perf_event_attr::default()
    };
    attr.__bindgen_anon_1.sample_period = sample_period;
    attr.__bindgen_anon_2.wakeup_events = wakeup_events;
    attr.set_disabled(1);
    attr.set_exclude_kernel(1);
    attr.set_precise_ip(1);
    attr
}

#[inline]
fn errno_result(ret: libc::c_int) -> Result<(), i32> {
    if ret < 0 {
        Err(nix::errno::Errno::last_raw())
    } else {
        Ok(())
    }
}

/// `perf_event_open(2)` for one thread on any CPU.
///
/// Returns the owned counter fd or the errno.
pub fn perf_event_open(attr: &mut perf_event_attr, tid: libc::pid_t) -> Result<OwnedFd, i32> {
    let fd = unsafe { sys::perf_event_open(attr, tid, -1, -1, PERF_FLAG_FD_CLOEXEC.into()) };
    errno_result(fd)?;
    Ok(unsafe { OwnedFd::from_raw_fd(fd as RawFd) })
}

pub fn reset(fd: RawFd) -> Result<(), i32> {
    errno_result(unsafe { sys::ioctls::RESET(fd, 0) })
}

pub fn enable(fd: RawFd) -> Result<(), i32> {
    errno_result(unsafe { sys::ioctls::ENABLE(fd, 0) })
}

pub fn disable(fd: RawFd) -> Result<(), i32> {
    errno_result(unsafe { sys::ioctls::DISABLE(fd, 0) })
}
