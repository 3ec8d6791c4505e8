//! Exponential backoff with full jitter.
//!
//! The delay before retry `a` is drawn uniformly from
//! `[0, min(max_delay, initial_delay * multiplier^a)]`. Spreading retries over
//! the whole interval keeps independent callers from retrying in lockstep.
//! A server-supplied hint replaces the computed value when the configuration
//! says to respect it.

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::RetryConfig;

/// Source of randomness for jitter.
///
/// Implementations must be safe to share between concurrently running loops.
pub trait JitterSource: Send + Sync {
    /// Return a duration uniformly distributed in `[0, max]`.
    fn jitter(&self, max: Duration) -> Duration;
}

fn nanos(max: Duration) -> u64 {
    u64::try_from(max.as_nanos()).unwrap_or(u64::MAX)
}

/// Jitter from the thread-local RNG. The default for production use.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn jitter(&self, max: Duration) -> Duration {
        Duration::from_nanos(rand::thread_rng().gen_range(0..=nanos(max)))
    }
}

/// Reproducible jitter from a seeded RNG.
#[derive(Debug)]
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl JitterSource for SeededJitter {
    fn jitter(&self, max: Duration) -> Duration {
        // A poisoned RNG is still a usable RNG.
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Duration::from_nanos(rng.gen_range(0..=nanos(max)))
    }
}

/// Always picks the same fraction of the range. `1.0` disables jitter.
#[derive(Clone, Copy, Debug)]
pub struct FixedJitter {
    ratio: f64,
}

impl FixedJitter {
    pub fn new(ratio: f64) -> Self {
        let ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            1.0
        };
        Self { ratio }
    }

    /// No jitter: the full computed delay every time.
    pub fn none() -> Self {
        Self::new(1.0)
    }
}

impl JitterSource for FixedJitter {
    fn jitter(&self, max: Duration) -> Duration {
        max.mul_f64(self.ratio).min(max)
    }
}

/// The un-jittered delay for a zero-based attempt index, capped at `max_delay`.
pub fn exponential_base(config: &RetryConfig, attempt: u32) -> Duration {
    let secs = config.initial_delay.as_secs_f64() * config.multiplier.powf(f64::from(attempt));

    if !secs.is_finite() || secs >= config.max_delay.as_secs_f64() {
        return config.max_delay;
    }
    if secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(secs)
}

/// Delay to wait before the next attempt.
///
/// `server_hint` is the parsed `Retry-After` value, zero when absent.
pub fn backoff_delay(
    config: &RetryConfig,
    attempt: u32,
    server_hint: Duration,
    jitter: &dyn JitterSource,
) -> Duration {
    if config.respect_server_hint && !server_hint.is_zero() {
        return server_hint;
    }

    let base = exponential_base(config, attempt);
    if base.is_zero() {
        return Duration::ZERO;
    }
    jitter.jitter(base)
}
