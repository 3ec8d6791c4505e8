//! Businessmap Retry Crate
//!
//! Resilient multi-endpoint fetching for rate-limited HTTP APIs.
//!
//! # Overview
//!
//! A single logical read against the Businessmap API is usually made of one
//! required request and a handful of optional ones. This crate drives all of
//! them under rate-limiting pressure:
//! - Per-endpoint exponential backoff with full jitter
//! - `Retry-After` hints (seconds or HTTP date) honoured when configured
//! - A hard cap on cumulative waiting per endpoint
//! - Fail-fast on anything that is not a rate limit
//! - Concurrent secondary fetches with partial-failure semantics
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |   Orchestrator   |  primary first, then secondaries concurrently
//! +------------------+
//!          |
//!          v
//! +------------------+     +------------------+
//! |  run_endpoint    | --> | backoff_delay    |  (full jitter, server hint)
//! +------------------+     +------------------+
//!          |
//!          v
//! +------------------+
//! |    Fetcher       |  (transport-specific, returns AttemptOutcome)
//! +------------------+
//!          |
//!          v
//! +------------------+
//! | ResultEnvelope   |  attempts, completion, partial errors, data
//! +------------------+
//! ```
//!
//! # Core Types
//!
//! - [`RetryConfig`] - Validated retry parameters
//! - [`AttemptOutcome`] - Tagged result of a single fetch attempt
//! - [`EndpointDescriptor`] - A named fetch operation
//! - [`EndpointResult`] - Terminal record for one endpoint
//! - [`ResultEnvelope`] - Aggregated report returned to callers
//! - [`Orchestrator`] - Primary/secondary fan-out driver

pub mod backoff;
pub mod classify;
pub mod config;
pub mod endpoint;
pub mod envelope;
pub mod errors;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::{
    backoff_delay, exponential_base, FixedJitter, JitterSource, SeededJitter, ThreadRngJitter,
};
pub use classify::{
    classify_status, parse_retry_after, parse_retry_after_at, AttemptOutcome, FetchFailure,
    RateLimitSignal,
};
pub use config::{RetryConfig, RetryConfigOverrides};
pub use endpoint::{run_endpoint, EndpointDescriptor, EndpointResult, Fetcher, Termination};
pub use envelope::{MergeError, MergePayload, ResultEnvelope};
pub use errors::{CancelPoint, ExhaustReason, RetryError};
pub use orchestrator::{Orchestration, Orchestrator};

// Re-exported so callers do not need a direct tokio-util dependency.
pub use tokio_util::sync::CancellationToken;
