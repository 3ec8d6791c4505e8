//! Error types for endpoint retry loops and fan-out orchestration.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::classify::{FetchFailure, RateLimitSignal};

/// Why a retry loop gave up while only seeing rate limits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExhaustReason {
    /// Every permitted attempt was used.
    MaxAttempts,
    /// The next wait would have pushed the cumulative wait past the cap.
    WaitCap(Duration),
}

impl fmt::Display for ExhaustReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxAttempts => write!(f, "max retries exceeded"),
            Self::WaitCap(cap) => write!(f, "total wait time would exceed cap ({:?})", cap),
        }
    }
}

/// Where in the retry loop a cancellation was observed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CancelPoint {
    BeforeAttempt,
    DuringAttempt,
    DuringBackoff,
}

impl fmt::Display for CancelPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeAttempt => write!(f, "before attempt"),
            Self::DuringAttempt => write!(f, "during attempt"),
            Self::DuringBackoff => write!(f, "during backoff"),
        }
    }
}

/// Errors produced by the retry loop and the orchestrator.
///
/// Every variant that concerns a single endpoint names it, so a message
/// taken out of a [`ResultEnvelope`](crate::ResultEnvelope) still makes
/// sense on its own.
#[derive(Error, Debug, Clone)]
pub enum RetryError {
    /// Retry parameters were rejected before any request was made.
    #[error("invalid retry config: {0}")]
    InvalidConfig(String),

    /// A non rate-limit failure. Never retried.
    #[error("{endpoint}: request failed after {attempts} attempt(s): {failure}")]
    Fatal {
        endpoint: String,
        attempts: u32,
        failure: FetchFailure,
    },

    /// Only rate limits were seen and the attempt or wait budget ran out.
    #[error("{endpoint}: {reason} after {attempts} attempt(s): {last}")]
    Exhausted {
        endpoint: String,
        attempts: u32,
        reason: ExhaustReason,
        /// Diagnostic from the final rate-limited response.
        last: RateLimitSignal,
    },

    /// The cancellation token fired inside an endpoint's loop.
    #[error("{endpoint}: request canceled {point} after {attempts} attempt(s)")]
    Canceled {
        endpoint: String,
        attempts: u32,
        point: CancelPoint,
        /// Last rate-limit response seen before the cancellation, if any.
        last: Option<RateLimitSignal>,
    },

    /// The cancellation token fired while secondary endpoints were in flight.
    #[error("canceled while waiting for {}", pending.join(", "))]
    Interrupted { pending: Vec<String> },

    /// The primary endpoint failed; nothing downstream is meaningful.
    #[error("failed to fetch {endpoint}: {source}")]
    PrimaryFailed {
        endpoint: String,
        #[source]
        source: Box<RetryError>,
    },

    /// A secondary endpoint failed while `fail_on_partial` was set.
    #[error("partial failure fetching {endpoint}: {source}")]
    PartialFailure {
        endpoint: String,
        #[source]
        source: Box<RetryError>,
    },

    /// A payload was fetched but could not be merged into the result data.
    #[error("failed to parse {endpoint} data: {message}")]
    Payload { endpoint: String, message: String },
}

impl RetryError {
    /// Returns true when the error is the result of cancellation, at any depth.
    pub fn is_canceled(&self) -> bool {
        match self {
            Self::Canceled { .. } | Self::Interrupted { .. } => true,
            Self::PrimaryFailed { source, .. } | Self::PartialFailure { source, .. } => {
                source.is_canceled()
            }
            _ => false,
        }
    }

    /// Returns true when the error came from configuration validation.
    pub fn is_invalid_config(&self) -> bool {
        matches!(self, Self::InvalidConfig(_))
    }

    /// The endpoint this error is attributed to, if any.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::Fatal { endpoint, .. }
            | Self::Exhausted { endpoint, .. }
            | Self::Canceled { endpoint, .. }
            | Self::PrimaryFailed { endpoint, .. }
            | Self::PartialFailure { endpoint, .. }
            | Self::Payload { endpoint, .. } => Some(endpoint),
            Self::InvalidConfig(_) | Self::Interrupted { .. } => None,
        }
    }
}
