//! Rate limiter configuration.

use std::str::FromStr;

use chrono::Duration;

use crate::error::ValidationError;

pub const DEFAULT_THRESHOLD: u32 = 5;
pub const DEFAULT_KEY_PREFIX: &str = "sekisho:login_attempts:";
/// Longest accepted failure window.
pub const MAX_WINDOW_DAYS: i64 = 365;

/// Configuration for [`RateLimiter`](crate::RateLimiter).
///
/// The defaults block an identity after 5 failures inside a 15 minute sliding
/// window and give every storage call one second before it is abandoned.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// When false every check allows and nothing is recorded.
    pub enabled: bool,
    /// Failures inside one window that throttle the identity.
    pub threshold: u32,
    /// Length of the sliding window, restarted on every failure.
    pub window: Duration,
    /// Upper bound on any single storage call.
    pub storage_timeout: std::time::Duration,
    /// Whether a storage failure lets the attempt through.
    pub fail_open_on_storage_error: bool,
    /// Prepended to every storage key.
    pub key_prefix: String,
    /// How often the cleanup task purges expired records.
    pub cleanup_interval: std::time::Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: DEFAULT_THRESHOLD,
            window: Duration::minutes(15),
            storage_timeout: std::time::Duration::from_secs(1),
            fail_open_on_storage_error: true,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            cleanup_interval: std::time::Duration::from_secs(3600),
        }
    }
}

impl RateLimiterConfig {
    /// A configuration with throttling switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_storage_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open_on_storage_error = fail_open;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_cleanup_interval(mut self, interval: std::time::Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.threshold == 0 {
            return Err(ValidationError::InvalidConfig(
                "threshold must be at least 1".to_string(),
            ));
        }

        if self.window <= Duration::zero() {
            return Err(ValidationError::InvalidConfig(
                "window must be positive".to_string(),
            ));
        }

        if self.window > Duration::days(MAX_WINDOW_DAYS) {
            return Err(ValidationError::InvalidConfig(format!(
                "window must not exceed {MAX_WINDOW_DAYS} days"
            )));
        }

        if self.storage_timeout.is_zero() {
            return Err(ValidationError::InvalidConfig(
                "storage_timeout must be positive".to_string(),
            ));
        }

        if self.cleanup_interval.is_zero() {
            return Err(ValidationError::InvalidConfig(
                "cleanup_interval must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Load the configuration from `SEKISHO_*` environment variables.
    ///
    /// | variable                        | field                        |
    /// |---------------------------------|------------------------------|
    /// | `SEKISHO_ENABLED`               | `enabled`                    |
    /// | `SEKISHO_THRESHOLD`             | `threshold`                  |
    /// | `SEKISHO_WINDOW_SECS`           | `window`                     |
    /// | `SEKISHO_STORAGE_TIMEOUT_MS`    | `storage_timeout`            |
    /// | `SEKISHO_FAIL_OPEN`             | `fail_open_on_storage_error` |
    /// | `SEKISHO_KEY_PREFIX`            | `key_prefix`                 |
    /// | `SEKISHO_CLEANUP_INTERVAL_SECS` | `cleanup_interval`           |
    ///
    /// Unset variables keep their defaults. The result is validated.
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(enabled) = parse_var::<bool, _>(&lookup, "SEKISHO_ENABLED")? {
            config.enabled = enabled;
        }
        if let Some(threshold) = parse_var::<u32, _>(&lookup, "SEKISHO_THRESHOLD")? {
            config.threshold = threshold;
        }
        if let Some(secs) = parse_var::<i64, _>(&lookup, "SEKISHO_WINDOW_SECS")? {
            config.window = Duration::try_seconds(secs).ok_or_else(|| {
                ValidationError::InvalidConfig(format!(
                    "SEKISHO_WINDOW_SECS={secs} is out of range"
                ))
            })?;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SEKISHO_STORAGE_TIMEOUT_MS")? {
            config.storage_timeout = std::time::Duration::from_millis(ms);
        }
        if let Some(fail_open) = parse_var::<bool, _>(&lookup, "SEKISHO_FAIL_OPEN")? {
            config.fail_open_on_storage_error = fail_open;
        }
        if let Some(prefix) = lookup("SEKISHO_KEY_PREFIX") {
            config.key_prefix = prefix;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "SEKISHO_CLEANUP_INTERVAL_SECS")? {
            config.cleanup_interval = std::time::Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ValidationError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            ValidationError::InvalidConfig(format!("{name}={raw:?} is not valid: {e}"))
        }),
    }
}
