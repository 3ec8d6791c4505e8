//! Retry configuration and validation.

use std::time::Duration;

use serde::Deserialize;

use crate::errors::RetryError;

/// Default number of attempts per endpoint.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);

/// Default ceiling for a single computed backoff.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5 * 60);

/// Default growth factor between attempts.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Default ceiling on cumulative waiting per endpoint.
pub const DEFAULT_TOTAL_WAIT_CAP: Duration = Duration::from_secs(20 * 60);

/// Retry behaviour for a single endpoint loop.
///
/// Passed by value into every loop; call [`validate`](Self::validate)
/// before use. The orchestrator does this for you.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum attempts including the first one.
    pub max_attempts: u32,
    /// Base delay used for attempt index 0.
    pub initial_delay: Duration,
    /// Upper bound for a computed (non-hinted) delay.
    pub max_delay: Duration,
    /// Exponential growth factor.
    pub multiplier: f64,
    /// Use the server's `Retry-After` hint instead of computed backoff.
    pub respect_server_hint: bool,
    /// Hard ceiling on cumulative waiting, independent of `max_attempts`.
    pub total_wait_cap: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            respect_server_hint: true,
            total_wait_cap: DEFAULT_TOTAL_WAIT_CAP,
        }
    }
}

impl RetryConfig {
    /// Check the configuration before any network activity starts.
    pub fn validate(&self) -> Result<(), RetryError> {
        if self.max_attempts < 1 {
            return Err(RetryError::InvalidConfig(format!(
                "max_attempts must be >= 1, got {}",
                self.max_attempts
            )));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(RetryError::InvalidConfig(format!(
                "multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.initial_delay.is_zero() {
            return Err(RetryError::InvalidConfig(format!(
                "initial_delay must be > 0, got {:?}",
                self.initial_delay
            )));
        }
        if self.max_delay < self.initial_delay {
            return Err(RetryError::InvalidConfig(format!(
                "max_delay ({:?}) must be >= initial_delay ({:?})",
                self.max_delay, self.initial_delay
            )));
        }
        if self.total_wait_cap < self.initial_delay {
            return Err(RetryError::InvalidConfig(format!(
                "total_wait_cap ({:?}) must be >= initial_delay ({:?})",
                self.total_wait_cap, self.initial_delay
            )));
        }
        Ok(())
    }
}

/// Optional per-request overrides, as accepted from tool callers.
///
/// Durations are whole milliseconds. Unset fields keep the base value.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfigOverrides {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub respect_retry_after: Option<bool>,
    pub total_wait_cap_ms: Option<u64>,
}

impl RetryConfigOverrides {
    /// Apply the overrides on top of `base`. The result is not validated.
    pub fn apply(&self, base: RetryConfig) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            initial_delay: self
                .initial_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(base.initial_delay),
            max_delay: self
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(base.max_delay),
            multiplier: self.multiplier.unwrap_or(base.multiplier),
            respect_server_hint: self.respect_retry_after.unwrap_or(base.respect_server_hint),
            total_wait_cap: self
                .total_wait_cap_ms
                .map(Duration::from_millis)
                .unwrap_or(base.total_wait_cap),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
