//! Error types for the agent
//!
//! Nothing here is ever fatal to the host process. Every failure
//! path ends in "monitor one thing fewer", so the variants mostly
//! exist to say which thing and why in the log.

use core::fmt;

use crate::event::EventKind;

/// Result type for agent operations
pub type HptResult<T> = Result<T, HptError>;

/// Errors that can occur in the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HptError {
    /// Event descriptor not understood by the encoder
    UnknownEvent(String),

    /// Counter could not be opened or mapped
    Counter(CounterError),

    /// Readiness wait on a counter handle failed for good
    Readiness(ReadinessError),

    /// Thread enumeration failed
    ThreadList(i32),

    /// Consumer or scanner thread could not be spawned
    SpawnFailed,

    /// Large-page hint was rejected by the OS
    AdviseFailed(i32),

    /// Operation was cancelled via CancellationToken
    Cancelled,

    /// Configuration rejected by `validate()`
    InvalidConfig(&'static str),
}

impl fmt::Display for HptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HptError::UnknownEvent(name) => write!(f, "unknown event descriptor {:?}", name),
            HptError::Counter(e) => write!(f, "counter error: {}", e),
            HptError::Readiness(e) => write!(f, "readiness error: {}", e),
            HptError::ThreadList(errno) => write!(f, "thread enumeration failed: errno {}", errno),
            HptError::SpawnFailed => write!(f, "failed to spawn agent thread"),
            HptError::AdviseFailed(errno) => write!(f, "madvise failed: errno {}", errno),
            HptError::Cancelled => write!(f, "operation cancelled"),
            HptError::InvalidConfig(why) => write!(f, "invalid config: {}", why),
        }
    }
}

impl std::error::Error for HptError {}

/// Failures while acquiring a counter session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterError {
    /// perf_event_open failed (EACCES, ENOENT, EMFILE, ...)
    Open { event: EventKind, tid: i32, errno: i32 },

    /// mmap of the sample ring failed; the fd was closed
    Map { event: EventKind, tid: i32, errno: i32 },

    /// ioctl to reset/enable the counter failed
    Ioctl { event: EventKind, tid: i32, errno: i32 },
}

impl fmt::Display for CounterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterError::Open { event, tid, errno } => {
                write!(f, "perf_event_open({}, tid={}): errno {}", event, tid, errno)
            }
            CounterError::Map { event, tid, errno } => {
                write!(f, "mmap ring ({}, tid={}): errno {}", event, tid, errno)
            }
            CounterError::Ioctl { event, tid, errno } => {
                write!(f, "ioctl ({}, tid={}): errno {}", event, tid, errno)
            }
        }
    }
}

impl From<CounterError> for HptError {
    fn from(e: CounterError) -> Self {
        HptError::Counter(e)
    }
}

/// Unrecoverable conditions reported by poll on a counter handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessError {
    /// POLLHUP: the monitored thread exited
    HangUp,

    /// POLLNVAL: the handle is not open
    InvalidHandle,

    /// POLLERR
    Error,

    /// poll itself failed with errno
    Poll(i32),
}

impl fmt::Display for ReadinessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessError::HangUp => write!(f, "hang-up"),
            ReadinessError::InvalidHandle => write!(f, "invalid handle"),
            ReadinessError::Error => write!(f, "error condition"),
            ReadinessError::Poll(errno) => write!(f, "poll failed: errno {}", errno),
        }
    }
}

impl From<ReadinessError> for HptError {
    fn from(e: ReadinessError) -> Self {
        HptError::Readiness(e)
    }
}
