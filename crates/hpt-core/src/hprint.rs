//! Leveled stderr logging for the agent
//!
//! The agent lives inside someone else's process, so it only ever writes
//! to stderr and never fails the caller because of a write error. Each
//! line carries the level and the writing thread's name, which for agent
//! threads says what they are (`hpt-scanner`, `hpt-tlb-ld`, ...):
//!
//! ```text
//! hpt warn  [hpt-scanner] not monitoring tlb-st on tid 4711: ...
//! hpt debug [hpt-ld] consumer for ld on tid 4711 done: Readiness(HangUp)
//! ```
//!
//! Environment: `HPT_LOG_LEVEL` (name or 0..5), `HPT_DEBUG` (any value
//! raises the level to at least debug), `HPT_FLUSH_EPRINT=1` (flush after
//! every line). Read once, on first use.

use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Once;

/// Log levels, most severe first
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    const BY_RANK: [LogLevel; 6] = [
        LogLevel::Off,
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    /// Numeric rank to level; anything past the end is `Trace`.
    pub fn from_u8(v: u8) -> Self {
        Self::BY_RANK.get(v as usize).copied().unwrap_or(LogLevel::Trace)
    }

    /// Level name or rank, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Ok(rank) = s.parse::<u8>() {
            return Self::BY_RANK.get(rank as usize).copied();
        }
        Self::BY_RANK
            .iter()
            .copied()
            .find(|l| l.name().eq_ignore_ascii_case(s))
    }

    pub fn name(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

const FLUSH_BIT: u8 = 0x80;
const LEVEL_MASK: u8 = 0x7f;

/// Level in the low bits, flush flag in the top bit
static STATE: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static ENV_INIT: Once = Once::new();

/// Apply the environment. Runs once; later calls return immediately.
pub fn init() {
    ENV_INIT.call_once(|| {
        let mut level = std::env::var("HPT_LOG_LEVEL")
            .ok()
            .and_then(|v| LogLevel::parse(&v))
            .unwrap_or(LogLevel::Info);
        if crate::env::env_is_set("HPT_DEBUG") {
            level = level.max(LogLevel::Debug);
        }
        let flush = crate::env::env_get::<u8>("HPT_FLUSH_EPRINT", 0) != 0;
        STATE.store(level as u8 | if flush { FLUSH_BIT } else { 0 }, Ordering::Relaxed);
    });
}

fn state() -> u8 {
    init();
    STATE.load(Ordering::Relaxed)
}

pub fn log_level() -> LogLevel {
    LogLevel::from_u8(state() & LEVEL_MASK)
}

pub fn flush_enabled() -> bool {
    state() & FLUSH_BIT != 0
}

/// Override the level. Keeps the flush setting; the environment is not
/// consulted again afterwards.
pub fn set_log_level(level: LogLevel) {
    init();
    let _ = STATE.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |s| {
        Some((s & FLUSH_BIT) | level as u8)
    });
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

/// One line, written under the stderr lock
fn emit(level: Option<LogLevel>, args: std::fmt::Arguments<'_>) {
    let mut out = std::io::stderr().lock();
    if let Some(level) = level {
        let thread = std::thread::current();
        let _ = write!(
            out,
            "hpt {:<5} [{}] ",
            level.name(),
            thread.name().unwrap_or("?")
        );
    }
    let _ = out.write_fmt(args);
    let _ = out.write_all(b"\n");
    if flush_enabled() {
        let _ = out.flush();
    }
}

#[doc(hidden)]
pub fn _hprintln_impl(args: std::fmt::Arguments<'_>) {
    emit(None, args);
}

#[doc(hidden)]
pub fn _hlog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if level_enabled(level) {
        emit(Some(level), args);
    }
}

/// Unconditional line on stderr, no prefix
#[macro_export]
macro_rules! hprintln {
    ($($arg:tt)*) => {
        $crate::hprint::_hprintln_impl(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! herror {
    ($($arg:tt)*) => {
        $crate::hprint::_hlog_impl($crate::hprint::LogLevel::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! hwarn {
    ($($arg:tt)*) => {
        $crate::hprint::_hlog_impl($crate::hprint::LogLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! hinfo {
    ($($arg:tt)*) => {
        $crate::hprint::_hlog_impl($crate::hprint::LogLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! hdebug {
    ($($arg:tt)*) => {
        $crate::hprint::_hlog_impl($crate::hprint::LogLevel::Debug, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! htrace {
    ($($arg:tt)*) => {
        $crate::hprint::_hlog_impl($crate::hprint::LogLevel::Trace, format_args!($($arg)*))
    };
}
