//! Fan-out orchestration of one primary and many secondary endpoints.
//!
//! The primary runs first on the caller's task. It is load-bearing: if it
//! does not complete, the run stops there. Secondaries then run concurrently,
//! each in its own retry loop, and are collected in completion order. All
//! loops are polled from within [`Orchestrator::run`], so none of them can
//! outlive the call.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backoff::{JitterSource, ThreadRngJitter};
use crate::config::RetryConfig;
use crate::endpoint::{run_endpoint, EndpointDescriptor};
use crate::envelope::{MergePayload, ResultEnvelope};
use crate::errors::RetryError;

/// Output of [`Orchestrator::run`].
///
/// The envelope is always present, so partial results survive any error.
#[derive(Debug)]
pub struct Orchestration<T> {
    pub envelope: ResultEnvelope<T>,
    pub error: Option<RetryError>,
}

impl<T> Orchestration<T> {
    fn ok(envelope: ResultEnvelope<T>) -> Self {
        Self {
            envelope,
            error: None,
        }
    }

    fn failed(envelope: ResultEnvelope<T>, error: RetryError) -> Self {
        Self {
            envelope,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_parts(self) -> (ResultEnvelope<T>, Option<RetryError>) {
        (self.envelope, self.error)
    }
}

/// Drives a primary endpoint and its secondaries to completion.
#[derive(Clone)]
pub struct Orchestrator {
    jitter: Arc<dyn JitterSource>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::with_jitter(Arc::new(ThreadRngJitter))
    }

    /// Use a specific randomness source, e.g. a seeded one for reproducible runs.
    pub fn with_jitter(jitter: Arc<dyn JitterSource>) -> Self {
        Self { jitter }
    }

    /// Fetch `primary`, then all `secondaries` concurrently.
    ///
    /// Secondary failures are recorded in the envelope's `partial_error` and
    /// otherwise ignored, unless `fail_on_partial` is set, in which case the
    /// first one ends the run and the remaining loops are dropped.
    pub async fn run<T: MergePayload>(
        &self,
        primary: &EndpointDescriptor,
        secondaries: &[EndpointDescriptor],
        config: RetryConfig,
        fail_on_partial: bool,
        cancel: &CancellationToken,
    ) -> Orchestration<T> {
        let started = Instant::now();
        let mut envelope = ResultEnvelope::<T>::default();

        if let Err(err) = config.validate() {
            return Orchestration::failed(envelope, err);
        }
        if let Err(err) = check_unique_names(primary, secondaries) {
            return Orchestration::failed(envelope, err);
        }

        let jitter = self.jitter.as_ref();

        debug!("Fetching primary endpoint '{}'", primary.name());
        let primary_result = run_endpoint(primary, &config, cancel, jitter).await;
        if let Err(err) = envelope.record(primary_result) {
            warn!("Primary endpoint '{}' failed: {}", primary.name(), err);
            envelope.finalize(started);
            return Orchestration::failed(
                envelope,
                RetryError::PrimaryFailed {
                    endpoint: primary.name().to_string(),
                    source: Box::new(err),
                },
            );
        }

        if secondaries.is_empty() {
            envelope.finalize(started);
            return Orchestration::ok(envelope);
        }

        debug!(
            "Fetching {} secondary endpoint(s) concurrently",
            secondaries.len()
        );
        let mut pending: BTreeSet<&str> = secondaries.iter().map(|e| e.name()).collect();
        let mut in_flight: FuturesUnordered<_> = secondaries
            .iter()
            .map(|endpoint| run_endpoint(endpoint, &config, cancel, jitter))
            .collect();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    // Dropping the stream cancels every loop still running.
                    drop(in_flight);
                    let pending: Vec<String> = pending.iter().map(|s| s.to_string()).collect();
                    warn!("Canceled while waiting for secondary endpoints: {:?}", pending);
                    envelope.finalize(started);
                    return Orchestration::failed(envelope, RetryError::Interrupted { pending });
                }
                next = in_flight.next() => {
                    let Some(result) = next else { break };
                    let name = result.name.clone();
                    pending.remove(name.as_str());

                    if let Err(err) = envelope.record(result) {
                        warn!("Secondary endpoint '{}' did not complete: {}", name, err);
                        if fail_on_partial {
                            drop(in_flight);
                            envelope.finalize(started);
                            return Orchestration::failed(
                                envelope,
                                RetryError::PartialFailure {
                                    endpoint: name,
                                    source: Box::new(err),
                                },
                            );
                        }
                    }
                }
            }
        }

        envelope.finalize(started);
        info!(
            "Fetched '{}' with {} secondary endpoint(s) in {:.2}s ({} rate limit hit(s))",
            primary.name(),
            secondaries.len(),
            envelope.wait_seconds,
            envelope.rate_limit_hits
        );
        Orchestration::ok(envelope)
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

fn check_unique_names(
    primary: &EndpointDescriptor,
    secondaries: &[EndpointDescriptor],
) -> Result<(), RetryError> {
    let mut seen = HashSet::with_capacity(secondaries.len() + 1);
    for name in std::iter::once(primary.name()).chain(secondaries.iter().map(|e| e.name())) {
        if !seen.insert(name) {
            return Err(RetryError::InvalidConfig(format!(
                "duplicate endpoint name '{}'",
                name
            )));
        }
    }
    Ok(())
}
