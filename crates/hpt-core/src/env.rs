//! Environment variable utilities
//!
//! Every tunable of the agent comes from the environment of the host
//! process, since the agent is loaded into programs that know nothing
//! about it. The rules are the same for every knob:
//!
//! - unset → default
//! - set but not parseable as the target type → default
//! - `"0"` is a real value, distinct from unset
//!
//! # Usage
//!
//! ```ignore
//! use hpt_core::env::{env_get, env_is_set};
//!
//! let interval_ms: u64 = env_get("HPT_INTERVAL", 1000);
//! let debug = env_is_set("HPT_DEBUG");
//! ```

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default
///
/// Surrounding whitespace is ignored, so `HPT_THRESHOLD=" 5 "` parses.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as optional value
///
/// Returns `Some(T)` only if the variable is set and parses.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as string, or return default
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Check if environment variable is set (regardless of value)
///
/// `HPT_DEBUG=0` still counts as set.
#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var_os(key).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_returns_default() {
        let val: u64 = env_get("__HPT_TEST_UNSET_9931__", 4096);
        assert_eq!(val, 4096);
        assert!(env_get_opt::<u64>("__HPT_TEST_UNSET_9931__").is_none());
        assert!(!env_is_set("__HPT_TEST_UNSET_9931__"));
    }

    #[test]
    fn test_zero_is_a_value() {
        std::env::set_var("__HPT_TEST_ZERO__", "0");
        let val: u64 = env_get("__HPT_TEST_ZERO__", 1000);
        assert_eq!(val, 0);
        std::env::remove_var("__HPT_TEST_ZERO__");
    }

    #[test]
    fn test_garbage_falls_back() {
        std::env::set_var("__HPT_TEST_GARBAGE__", "lots");
        let val: u64 = env_get("__HPT_TEST_GARBAGE__", 100_000);
        assert_eq!(val, 100_000);

        std::env::set_var("__HPT_TEST_GARBAGE__", "-5");
        let val: u64 = env_get("__HPT_TEST_GARBAGE__", 100_000);
        assert_eq!(val, 100_000);
        std::env::remove_var("__HPT_TEST_GARBAGE__");
    }

    #[test]
    fn test_whitespace_is_trimmed() {
        std::env::set_var("__HPT_TEST_WS__", " 250 ");
        let val: u64 = env_get("__HPT_TEST_WS__", 1);
        assert_eq!(val, 250);
        std::env::remove_var("__HPT_TEST_WS__");
    }

    #[test]
    fn test_set_but_zero_counts_as_set() {
        std::env::set_var("__HPT_TEST_FLAG__", "0");
        assert!(env_is_set("__HPT_TEST_FLAG__"));
        assert_eq!(env_get_str("__HPT_TEST_FLAG__", "x"), "0");
        std::env::remove_var("__HPT_TEST_FLAG__");
        assert_eq!(env_get_str("__HPT_TEST_FLAG__", "x"), "x");
    }
}
