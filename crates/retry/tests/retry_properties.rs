//! Property-based tests for backoff, classification and the retry loop.
//!
//! These use the `proptest` crate to check invariants over randomly
//! generated configurations and fetch scripts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use proptest::prelude::*;

use businessmap_retry::{
    backoff_delay, exponential_base, parse_retry_after_at, run_endpoint, AttemptOutcome,
    CancellationToken, EndpointDescriptor, Fetcher, FixedJitter, RateLimitSignal, RetryConfig,
    SeededJitter, Termination, ThreadRngJitter,
};

// =============================================================================
// Generators
// =============================================================================

/// Generates a configuration that passes validation.
fn arb_config() -> impl Strategy<Value = RetryConfig> {
    (
        1u32..=12,
        1u64..=10_000,
        0u64..=600_000,
        1.0f64..=4.0,
        any::<bool>(),
        0u64..=3_600_000,
    )
        .prop_map(
            |(max_attempts, initial_ms, extra_max_ms, multiplier, respect, extra_cap_ms)| {
                let initial_delay = Duration::from_millis(initial_ms);
                RetryConfig {
                    max_attempts,
                    initial_delay,
                    max_delay: initial_delay + Duration::from_millis(extra_max_ms),
                    multiplier,
                    respect_server_hint: respect,
                    total_wait_cap: initial_delay + Duration::from_millis(extra_cap_ms),
                }
            },
        )
}

struct Script {
    outcomes: Mutex<VecDeque<AttemptOutcome>>,
    calls: AtomicU32,
}

impl Script {
    fn rate_limits_then_success(rate_limits: u32) -> Self {
        let mut outcomes: VecDeque<_> = (0..rate_limits)
            .map(|_| AttemptOutcome::RateLimited(RateLimitSignal::new(Duration::ZERO)))
            .collect();
        outcomes.push_back(AttemptOutcome::Success(Bytes::from_static(b"{}")));
        Self {
            outcomes: Mutex::new(outcomes),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Fetcher for Script {
    async fn fetch(&self) -> AttemptOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| AttemptOutcome::RateLimited(RateLimitSignal::new(Duration::ZERO)))
    }
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn backoff_never_exceeds_max_delay(config in arb_config(), attempt in 0u32..64) {
        let config = RetryConfig { respect_server_hint: false, ..config };
        let delay = backoff_delay(&config, attempt, Duration::ZERO, &ThreadRngJitter);
        prop_assert!(delay <= config.max_delay);
        prop_assert!(delay <= exponential_base(&config, attempt));
    }

    #[test]
    fn seeded_backoff_never_exceeds_max_delay(
        config in arb_config(),
        attempt in 0u32..64,
        seed in any::<u64>(),
    ) {
        let delay = backoff_delay(&config, attempt, Duration::ZERO, &SeededJitter::new(seed));
        prop_assert!(delay <= config.max_delay);
    }

    #[test]
    fn respected_hint_is_returned_exactly(
        config in arb_config(),
        attempt in 0u32..64,
        hint_ms in 1u64..=7_200_000,
    ) {
        let config = RetryConfig { respect_server_hint: true, ..config };
        let hint = Duration::from_millis(hint_ms);
        prop_assert_eq!(backoff_delay(&config, attempt, hint, &ThreadRngJitter), hint);
    }

    #[test]
    fn generated_configs_validate(config in arb_config()) {
        prop_assert!(config.validate().is_ok());
    }

    #[test]
    fn integer_retry_after_is_seconds(seconds in 1u64..=86_400) {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        prop_assert_eq!(
            parse_retry_after_at(&seconds.to_string(), now),
            Duration::from_secs(seconds)
        );
    }

    #[test]
    fn http_date_retry_after_is_never_negative(offset in -86_400i64..=86_400) {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let at = if offset >= 0 {
            now + Duration::from_secs(offset as u64)
        } else {
            now - Duration::from_secs(offset.unsigned_abs())
        };
        let parsed = parse_retry_after_at(&httpdate::fmt_http_date(at), now);
        let expected = Duration::from_secs(offset.max(0) as u64);
        prop_assert_eq!(parsed, expected);
    }

    #[test]
    fn rate_limits_then_success_counts_attempts(rate_limits in 0u32..8) {
        let config = RetryConfig {
            max_attempts: rate_limits + 1,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(80),
            multiplier: 2.0,
            respect_server_hint: true,
            total_wait_cap: Duration::from_secs(60),
        };
        let script = Arc::new(Script::rate_limits_then_success(rate_limits));
        let endpoint = EndpointDescriptor::new("card", script.clone());

        let result = paused_runtime().block_on(async {
            run_endpoint(&endpoint, &config, &CancellationToken::new(), &FixedJitter::none()).await
        });

        prop_assert_eq!(result.termination, Termination::Succeeded);
        prop_assert_eq!(result.attempts, rate_limits + 1);
        prop_assert_eq!(result.rate_limit_hits, rate_limits);
        prop_assert_eq!(script.calls.load(Ordering::SeqCst), rate_limits + 1);
    }

    #[test]
    fn always_rate_limited_uses_every_attempt(max_attempts in 1u32..10) {
        let config = RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(80),
            multiplier: 2.0,
            respect_server_hint: true,
            total_wait_cap: Duration::from_secs(60),
        };
        // Enough rate limits that success is never reached.
        let script = Arc::new(Script::rate_limits_then_success(max_attempts));
        let endpoint = EndpointDescriptor::new("comments", script.clone());

        let result = paused_runtime().block_on(async {
            run_endpoint(&endpoint, &config, &CancellationToken::new(), &FixedJitter::none()).await
        });

        prop_assert_eq!(result.termination, Termination::Exhausted);
        prop_assert_eq!(result.attempts, max_attempts);
        prop_assert_eq!(result.rate_limit_hits, max_attempts);
    }
}
