//! Single-endpoint retry loop.
//!
//! Drives one named fetch through `Attempting` until it reaches one of the
//! terminal states in [`Termination`]. Attempts are strictly sequential;
//! counters are local to the loop and handed back once in the
//! [`EndpointResult`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backoff::{backoff_delay, JitterSource};
use crate::classify::{AttemptOutcome, RateLimitSignal};
use crate::config::RetryConfig;
use crate::errors::{CancelPoint, ExhaustReason, RetryError};

/// The "fetch one resource" primitive.
///
/// Implementations perform exactly one request and classify the result.
/// They must not retry on their own.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self) -> AttemptOutcome;
}

/// A named fetch operation.
#[derive(Clone)]
pub struct EndpointDescriptor {
    name: String,
    fetcher: Arc<dyn Fetcher>,
}

impl EndpointDescriptor {
    pub fn new(name: impl Into<String>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            name: name.into(),
            fetcher,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> AttemptOutcome {
        self.fetcher.fetch().await
    }
}

impl fmt::Debug for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Terminal state of a retry loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Termination {
    Succeeded,
    /// Attempt count or wait cap ran out while rate limited.
    Exhausted,
    /// A non rate-limit failure ended the loop immediately.
    Fatal,
    Canceled,
}

/// Terminal record for one endpoint.
#[derive(Debug)]
pub struct EndpointResult {
    pub name: String,
    pub payload: Option<Bytes>,
    pub attempts: u32,
    pub rate_limit_hits: u32,
    pub termination: Termination,
    /// Set for every termination other than `Succeeded`.
    pub error: Option<RetryError>,
}

impl EndpointResult {
    pub fn success(&self) -> bool {
        self.termination == Termination::Succeeded
    }

    fn failed(
        name: &str,
        attempts: u32,
        rate_limit_hits: u32,
        termination: Termination,
        error: RetryError,
    ) -> Self {
        Self {
            name: name.to_string(),
            payload: None,
            attempts,
            rate_limit_hits,
            termination,
            error: Some(error),
        }
    }
}

/// Loop-local bookkeeping.
struct LoopState<'a> {
    name: &'a str,
    attempts: u32,
    rate_limit_hits: u32,
    last: Option<RateLimitSignal>,
}

impl LoopState<'_> {
    fn canceled(self, point: CancelPoint) -> EndpointResult {
        debug!(
            "[RETRY] {} canceled {} after {} attempt(s)",
            self.name, point, self.attempts
        );
        EndpointResult::failed(
            self.name,
            self.attempts,
            self.rate_limit_hits,
            Termination::Canceled,
            RetryError::Canceled {
                endpoint: self.name.to_string(),
                attempts: self.attempts,
                point,
                last: self.last,
            },
        )
    }

    fn exhausted(self, reason: ExhaustReason, last: RateLimitSignal) -> EndpointResult {
        EndpointResult::failed(
            self.name,
            self.attempts,
            self.rate_limit_hits,
            Termination::Exhausted,
            RetryError::Exhausted {
                endpoint: self.name.to_string(),
                attempts: self.attempts,
                reason,
                last,
            },
        )
    }
}

/// Run one endpoint to a terminal state.
///
/// Cancellation is checked before every attempt and races both the request
/// and the backoff sleep. The cumulative wait compared against
/// `total_wait_cap` is the time elapsed since the loop started.
pub async fn run_endpoint(
    endpoint: &EndpointDescriptor,
    config: &RetryConfig,
    cancel: &CancellationToken,
    jitter: &dyn JitterSource,
) -> EndpointResult {
    let name = endpoint.name();

    if let Err(err) = config.validate() {
        return EndpointResult::failed(name, 0, 0, Termination::Fatal, err);
    }

    let started = Instant::now();
    let mut waited = Duration::ZERO;
    let mut state = LoopState {
        name,
        attempts: 0,
        rate_limit_hits: 0,
        last: None,
    };

    for attempt in 0..config.max_attempts {
        state.attempts = attempt + 1;

        if cancel.is_cancelled() {
            return state.canceled(CancelPoint::BeforeAttempt);
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return state.canceled(CancelPoint::DuringAttempt),
            outcome = endpoint.fetch() => outcome,
        };

        let signal = match outcome {
            AttemptOutcome::Success(payload) => {
                if attempt > 0 {
                    info!(
                        "[RETRY] Success for {} after {} attempts, total wait: {:?}",
                        name, state.attempts, waited
                    );
                }
                return EndpointResult {
                    name: name.to_string(),
                    payload: Some(payload),
                    attempts: state.attempts,
                    rate_limit_hits: state.rate_limit_hits,
                    termination: Termination::Succeeded,
                    error: None,
                };
            }
            AttemptOutcome::Fatal(failure) => {
                debug!(
                    "[RETRY] {} failed with non rate-limit error, not retrying: {}",
                    name, failure
                );
                return EndpointResult::failed(
                    name,
                    state.attempts,
                    state.rate_limit_hits,
                    Termination::Fatal,
                    RetryError::Fatal {
                        endpoint: name.to_string(),
                        attempts: state.attempts,
                        failure,
                    },
                );
            }
            AttemptOutcome::RateLimited(signal) => signal,
        };

        state.rate_limit_hits += 1;

        if state.attempts >= config.max_attempts {
            warn!(
                "[RETRY] Max attempts ({}) exceeded for {}",
                config.max_attempts, name
            );
            return state.exhausted(ExhaustReason::MaxAttempts, signal);
        }

        let delay = backoff_delay(config, attempt, signal.retry_after, jitter);

        if waited + delay > config.total_wait_cap {
            warn!(
                "[RETRY] Would exceed total wait cap ({:?}) for {}, aborting",
                config.total_wait_cap, name
            );
            return state.exhausted(ExhaustReason::WaitCap(config.total_wait_cap), signal);
        }

        if signal.retry_after.is_zero() {
            warn!(
                "[RETRY] {} attempt {}/{} failed: rate limit hit, waiting {:?}",
                name, state.attempts, config.max_attempts, delay
            );
        } else {
            warn!(
                "[RETRY] {} attempt {}/{} failed: rate limit hit (Retry-After: {:?}), waiting {:?}",
                name, state.attempts, config.max_attempts, signal.retry_after, delay
            );
        }
        state.last = Some(signal);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return state.canceled(CancelPoint::DuringBackoff),
            _ = tokio::time::sleep(delay) => {
                waited = started.elapsed();
            }
        }
    }

    // Unreachable for a validated config: the last iteration always returns.
    let last = state
        .last
        .clone()
        .unwrap_or_else(|| RateLimitSignal::new(Duration::ZERO));
    state.exhausted(ExhaustReason::MaxAttempts, last)
}
