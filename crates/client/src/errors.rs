use businessmap_retry::{FetchFailure, RateLimitSignal, RetryError};
use thiserror::Error;

/// Errors returned by [`crate::BusinessmapClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("card ID or URL cannot be empty")]
    EmptyCardId,

    #[error("invalid card URL format: {0}")]
    InvalidCardUrl(String),

    #[error("comment text cannot be empty")]
    EmptyComment,

    #[error(
        "at least one filter parameter (board_ids, lane_ids, workflow_ids, or card_ids) must be provided"
    )]
    MissingFilter,

    #[error(transparent)]
    Api(#[from] FetchFailure),

    #[error(transparent)]
    RateLimited(#[from] RateLimitSignal),

    #[error("failed to parse {what}: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Retry(#[from] RetryError),
}

impl ClientError {
    /// True for errors caused by the caller's input rather than the API.
    pub fn is_invalid_input(&self) -> bool {
        match self {
            Self::EmptyCardId | Self::InvalidCardUrl(_) | Self::EmptyComment | Self::MissingFilter => {
                true
            }
            Self::Retry(err) => err.is_invalid_config(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
