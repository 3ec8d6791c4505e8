//! Businessmap (Kanbanize) API client.
//!
//! Single-shot operations live on [`BusinessmapClient`] directly. The
//! `*_with_retry` operations drive each endpoint through the
//! `businessmap-retry` orchestrator, so rate limits are waited out and
//! partial results are reported instead of discarded.

mod client;
mod errors;
mod models;
mod retry;
mod timestamps;

pub use client::{extract_card_id, BusinessmapClient, CardEndpoint};
pub use errors::{ClientError, Result};
pub use models::{
    AddCommentData, CardDetails, CardSummary, Comment, CustomField, GetCardsRequest, LinkedCard,
    Subtask,
};
pub use retry::{
    CardList, Fetched, GetCardsWithRetryResponse, ReadCardWithRetryResponse, CARDS_ENDPOINT,
    CARD_ENDPOINT, COMMENTS_ENDPOINT, SUBTASKS_ENDPOINT,
};
pub use timestamps::{parse_comment_timestamp, parse_timestamp};

pub use businessmap_retry::{CancellationToken, RetryConfig, RetryConfigOverrides, RetryError};
