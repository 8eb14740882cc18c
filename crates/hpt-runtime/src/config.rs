//! Agent configuration
//!
//! Library defaults with runtime environment overrides. Absent or
//! unparsable variables keep the default; `0` is a real value.
//!
//! # Example
//!
//! ```rust,ignore
//! use hpt_runtime::config::AgentConfig;
//!
//! let config = AgentConfig::from_env()
//!     .interval(Duration::from_millis(500))
//!     .threshold(50_000);
//! config.validate()?;
//! ```

use std::time::Duration;

use hpt_core::env::{env_get, env_get_str, env_is_set};
use hpt_core::promotion::{HintMode, MergePolicy};
use hpt_core::{hwarn, HptError, HptResult};

/// Library defaults
pub mod defaults {
    /// Scan cycle length in milliseconds
    pub const INTERVAL_MS: u64 = 1000;
    /// Qualifying events per sample
    pub const SAMPLE_PERIOD: u64 = 4096;
    /// Samples per readiness wakeup
    pub const WAKEUP_EVENTS: u32 = 65536;
    /// Window count a huge page must exceed to be promoted
    pub const THRESHOLD: u64 = 100_000;
    pub const MERGE_POLICY: &str = "ABOVE_THRESHOLD";
    pub const HINT_MODE: &str = "span";
    /// Sample ring data pages (16 MiB)
    pub const BUFFER_PAGES: usize = 4096;
    /// Largest accepted ring data area, per session
    pub const MAX_RING_BYTES: usize = 1 << 30;
    /// Upper bound on one readiness wait, so consumers see cancellation
    pub const POLL_TIMEOUT_MS: u64 = 100;
}

/// Configuration for the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Time between scan cycles
    pub interval: Duration,
    pub sample_period: u64,
    pub wakeup_events: u32,
    pub threshold: u64,
    pub merge_policy: MergePolicy,
    pub hint_mode: HintMode,
    /// Data pages per sample ring, power of 2
    pub buffer_pages: usize,
    pub poll_timeout: Duration,
    pub debug: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl AgentConfig {
    /// Defaults plus environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `HPT_INTERVAL` - Scan interval in milliseconds
    /// - `HPT_SAMPLE_PERIOD` - Events per sample
    /// - `HPT_WAKEUP_EVENTS` - Samples per wakeup
    /// - `HPT_THRESHOLD` - Promotion threshold
    /// - `HPT_MERGE_POLICY` - Policy name (`ABOVE_THRESHOLD`)
    /// - `HPT_HINT_MODE` - `span` or `single`
    /// - `HPT_BUFFER_PAGES` - Ring data pages (power of 2)
    /// - `HPT_POLL_TIMEOUT_MS` - Consumer wait bound
    /// - `HPT_DEBUG` - Verbose diagnostics when set
    pub fn from_env() -> Self {
        let hint_name = env_get_str("HPT_HINT_MODE", defaults::HINT_MODE);
        let hint_mode = HintMode::parse(&hint_name).unwrap_or_else(|| {
            hwarn!("unknown HPT_HINT_MODE {:?}, using {}", hint_name, defaults::HINT_MODE);
            HintMode::Span
        });

        Self {
            interval: Duration::from_millis(env_get("HPT_INTERVAL", defaults::INTERVAL_MS)),
            sample_period: env_get("HPT_SAMPLE_PERIOD", defaults::SAMPLE_PERIOD),
            wakeup_events: env_get("HPT_WAKEUP_EVENTS", defaults::WAKEUP_EVENTS),
            threshold: env_get("HPT_THRESHOLD", defaults::THRESHOLD),
            merge_policy: MergePolicy::parse(&env_get_str(
                "HPT_MERGE_POLICY",
                defaults::MERGE_POLICY,
            )),
            hint_mode,
            buffer_pages: env_get("HPT_BUFFER_PAGES", defaults::BUFFER_PAGES),
            poll_timeout: Duration::from_millis(env_get(
                "HPT_POLL_TIMEOUT_MS",
                defaults::POLL_TIMEOUT_MS,
            )),
            debug: env_is_set("HPT_DEBUG"),
        }
    }

    /// Pure defaults, no environment.
    pub fn new() -> Self {
        Self {
            interval: Duration::from_millis(defaults::INTERVAL_MS),
            sample_period: defaults::SAMPLE_PERIOD,
            wakeup_events: defaults::WAKEUP_EVENTS,
            threshold: defaults::THRESHOLD,
            merge_policy: MergePolicy::AboveThreshold,
            hint_mode: HintMode::Span,
            buffer_pages: defaults::BUFFER_PAGES,
            poll_timeout: Duration::from_millis(defaults::POLL_TIMEOUT_MS),
            debug: false,
        }
    }

    // Builder methods

    pub fn interval(mut self, d: Duration) -> Self {
        self.interval = d;
        self
    }

    pub fn sample_period(mut self, n: u64) -> Self {
        self.sample_period = n;
        self
    }

    pub fn wakeup_events(mut self, n: u32) -> Self {
        self.wakeup_events = n;
        self
    }

    pub fn threshold(mut self, n: u64) -> Self {
        self.threshold = n;
        self
    }

    pub fn merge_policy(mut self, p: MergePolicy) -> Self {
        self.merge_policy = p;
        self
    }

    pub fn hint_mode(mut self, m: HintMode) -> Self {
        self.hint_mode = m;
        self
    }

    pub fn buffer_pages(mut self, n: usize) -> Self {
        self.buffer_pages = n;
        self
    }

    pub fn poll_timeout(mut self, d: Duration) -> Self {
        self.poll_timeout = d;
        self
    }

    pub fn debug(mut self, enable: bool) -> Self {
        self.debug = enable;
        self
    }

    pub fn validate(&self) -> HptResult<()> {
        self.session_config().validate()
    }

    /// Settings each counter session needs
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            sample_period: self.sample_period,
            wakeup_events: self.wakeup_events,
            buffer_pages: self.buffer_pages,
            poll_timeout: self.poll_timeout,
        }
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("hugepagetune configuration:");
        eprintln!("  interval:       {:?}", self.interval);
        eprintln!("  sample_period:  {}", self.sample_period);
        eprintln!("  wakeup_events:  {}", self.wakeup_events);
        eprintln!("  threshold:      {}", self.threshold);
        eprintln!("  merge_policy:   {}", self.merge_policy.name());
        eprintln!("  hint_mode:      {}", self.hint_mode.name());
        eprintln!("  buffer_pages:   {}", self.buffer_pages);
        eprintln!("  poll_timeout:   {:?}", self.poll_timeout);
        eprintln!("  debug:          {}", self.debug);
    }
}

/// Per-session subset of `AgentConfig`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub sample_period: u64,
    pub wakeup_events: u32,
    pub buffer_pages: usize,
    pub poll_timeout: Duration,
}

impl SessionConfig {
    /// Data area size in bytes. `None` when it overflows or exceeds
    /// `defaults::MAX_RING_BYTES`.
    pub fn data_size(&self) -> Option<usize> {
        self.buffer_pages
            .checked_mul(hpt_core::page::PAGE_SIZE)
            .filter(|&n| n <= defaults::MAX_RING_BYTES)
    }

    pub fn validate(&self) -> HptResult<()> {
        if self.buffer_pages == 0 || !self.buffer_pages.is_power_of_two() {
            return Err(HptError::InvalidConfig("buffer_pages must be a power of 2"));
        }
        if self.data_size().is_none() {
            return Err(HptError::InvalidConfig("buffer_pages exceeds 1 GiB ring"));
        }
        if self.poll_timeout.is_zero() {
            return Err(HptError::InvalidConfig("poll_timeout must be > 0"));
        }
        if self.poll_timeout.as_millis() > i32::MAX as u128 {
            return Err(HptError::InvalidConfig("poll_timeout too large"));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        AgentConfig::new().session_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::new();
        assert_eq!(config.interval, Duration::from_millis(1000));
        assert_eq!(config.sample_period, 4096);
        assert_eq!(config.wakeup_events, 65536);
        assert_eq!(config.threshold, 100_000);
        assert_eq!(config.merge_policy, MergePolicy::AboveThreshold);
        assert_eq!(config.hint_mode, HintMode::Span);
        assert!(config.validate().is_ok());
        assert_eq!(config.session_config().data_size(), Some(16 << 20));
    }

    #[test]
    fn test_builder() {
        let config = AgentConfig::new()
            .interval(Duration::from_millis(10))
            .threshold(0)
            .hint_mode(HintMode::Single)
            .buffer_pages(8);
        assert_eq!(config.interval, Duration::from_millis(10));
        assert_eq!(config.threshold, 0);
        assert_eq!(config.session_config().buffer_pages, 8);
    }

    #[test]
    fn test_validate() {
        assert!(AgentConfig::new().buffer_pages(6).validate().is_err());
        assert!(AgentConfig::new().buffer_pages(0).validate().is_err());
        assert!(AgentConfig::new().poll_timeout(Duration::ZERO).validate().is_err());
        assert!(AgentConfig::new().buffer_pages(1).validate().is_ok());
    }

    #[test]
    fn test_oversized_ring_rejected() {
        // Power of two, but the byte size overflows usize
        let huge = AgentConfig::new().buffer_pages(1 << 52);
        assert!(matches!(huge.validate(), Err(HptError::InvalidConfig(_))));
        assert_eq!(huge.session_config().data_size(), None);

        let cap = defaults::MAX_RING_BYTES / hpt_core::page::PAGE_SIZE;
        assert!(AgentConfig::new().buffer_pages(cap).validate().is_ok());
        assert!(AgentConfig::new().buffer_pages(cap * 2).validate().is_err());
    }

    #[test]
    fn test_from_env_overrides() {
        // Names unique to this test; nothing else reads them concurrently.
        std::env::set_var("HPT_THRESHOLD", "0");
        std::env::set_var("HPT_SAMPLE_PERIOD", "not-a-number");
        std::env::set_var("HPT_HINT_MODE", "single");
        let config = AgentConfig::from_env();
        std::env::remove_var("HPT_THRESHOLD");
        std::env::remove_var("HPT_SAMPLE_PERIOD");
        std::env::remove_var("HPT_HINT_MODE");

        assert_eq!(config.threshold, 0);
        assert_eq!(config.sample_period, defaults::SAMPLE_PERIOD);
        assert_eq!(config.hint_mode, HintMode::Single);
    }
}
