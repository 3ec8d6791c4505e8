//! Rate-limit aware card operations built on the orchestrator.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::info;
use serde::Serialize;

use businessmap_retry::{
    CancellationToken, EndpointDescriptor, MergeError, MergePayload, Orchestration,
    Orchestrator, ResultEnvelope, RetryConfig, RetryError,
};

use crate::client::{extract_card_id, BusinessmapClient, CardEndpoint};
use crate::errors::{ClientError, Result};
use crate::models::{
    CardData, CardDataResponse, CardDetails, CardSummary, CommentsResponse, GetCardsRequest,
    GetCardsResponse, SubtasksResponse,
};
use crate::timestamps::parse_timestamp;

pub const CARD_ENDPOINT: &str = "card";
pub const COMMENTS_ENDPOINT: &str = "comments";
pub const SUBTASKS_ENDPOINT: &str = "subtasks";
pub const CARDS_ENDPOINT: &str = "cards";

/// A response assembled from whatever could be fetched, plus the error that
/// stopped the run, if any.
#[derive(Debug)]
pub struct Fetched<R> {
    pub response: R,
    pub error: Option<RetryError>,
}

impl<R> Fetched<R> {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> std::result::Result<R, (R, RetryError)> {
        match self.error {
            None => Ok(self.response),
            Some(err) => Err((self.response, err)),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ReadCardWithRetryResponse {
    pub card_id: String,
    #[serde(flatten)]
    pub envelope: ResultEnvelope<CardDetails>,
}

#[derive(Clone, Debug, Serialize)]
pub struct GetCardsWithRetryResponse {
    pub filter_used: String,
    pub filter_values: Vec<i64>,
    pub attempts: BTreeMap<String, u32>,
    pub wait_seconds: f64,
    pub rate_limit_hits: u32,
    pub completed: BTreeMap<String, bool>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub partial_error: BTreeMap<String, String>,
    pub cards: Vec<CardSummary>,
}

/// Cards collected from the listing endpoint.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CardList(pub Vec<CardSummary>);

impl MergePayload for CardList {
    fn merge_payload(&mut self, endpoint: &str, payload: &[u8]) -> std::result::Result<(), MergeError> {
        if endpoint != CARDS_ENDPOINT {
            return Err(MergeError::unknown_endpoint(endpoint));
        }
        let response: GetCardsResponse = serde_json::from_slice(payload)?;
        self.0.extend(response.data.data);
        Ok(())
    }
}

impl MergePayload for CardDetails {
    fn merge_payload(&mut self, endpoint: &str, payload: &[u8]) -> std::result::Result<(), MergeError> {
        match endpoint {
            CARD_ENDPOINT => {
                let response: CardDataResponse = serde_json::from_slice(payload)?;
                self.apply_card(response.data);
            }
            COMMENTS_ENDPOINT => {
                let response: CommentsResponse = serde_json::from_slice(payload)?;
                self.comments = response.data.into_iter().map(Into::into).collect();
            }
            SUBTASKS_ENDPOINT => {
                let response: SubtasksResponse = serde_json::from_slice(payload)?;
                self.subtasks = response.data.into_iter().map(Into::into).collect();
            }
            other => return Err(MergeError::unknown_endpoint(other)),
        }
        Ok(())
    }
}

impl CardDetails {
    pub(crate) fn apply_card(&mut self, card: CardData) {
        self.title = card.title;
        self.description = card.description;
        self.linked_cards = card.linked_cards;
        self.custom_fields = card.custom_fields;
        self.created_at = parse_timestamp(card.created_at.as_deref());
        self.last_modified = parse_timestamp(card.last_modified.as_deref());
        self.in_current_position_since = parse_timestamp(card.in_current_position_since.as_deref());
        self.first_request_time = parse_timestamp(card.first_request_time.as_deref());
        self.first_start_time = parse_timestamp(card.first_start_time.as_deref());
        self.first_end_time = parse_timestamp(card.first_end_time.as_deref());
        self.last_request_time = parse_timestamp(card.last_request_time.as_deref());
        self.last_start_time = parse_timestamp(card.last_start_time.as_deref());
        self.last_end_time = parse_timestamp(card.last_end_time.as_deref());

        if let Some(initiative) = card.initiative_details {
            self.planned_start_date = initiative.planned_start_date.filter(|s| !s.is_empty());
            self.planned_end_date = initiative.planned_end_date.filter(|s| !s.is_empty());
            self.actual_start_time = parse_timestamp(initiative.actual_start_time.as_deref());
            self.actual_end_time = parse_timestamp(initiative.actual_end_time.as_deref());
        }
    }
}

/// Invalid configuration is the caller's mistake; nothing was fetched.
fn reject_invalid_config<T>(
    orchestration: Orchestration<T>,
) -> Result<(ResultEnvelope<T>, Option<RetryError>)> {
    let (envelope, error) = orchestration.into_parts();
    match error {
        Some(err) if err.is_invalid_config() => Err(ClientError::Retry(err)),
        error => Ok((envelope, error)),
    }
}

impl BusinessmapClient {
    fn endpoint(&self, name: &str, url: String) -> EndpointDescriptor {
        EndpointDescriptor::new(name, Arc::new(CardEndpoint::new(self.clone(), url)))
    }

    /// Fetch a card, then its comments and subtasks concurrently, retrying
    /// each on rate limits.
    pub async fn read_card_with_retry(
        &self,
        cancel: &CancellationToken,
        card: &str,
        config: RetryConfig,
        fail_on_partial: bool,
    ) -> Result<Fetched<ReadCardWithRetryResponse>> {
        self.read_card_with_orchestrator(&Orchestrator::new(), cancel, card, config, fail_on_partial)
            .await
    }

    /// Same as [`Self::read_card_with_retry`] with a caller-supplied orchestrator.
    pub async fn read_card_with_orchestrator(
        &self,
        orchestrator: &Orchestrator,
        cancel: &CancellationToken,
        card: &str,
        config: RetryConfig,
        fail_on_partial: bool,
    ) -> Result<Fetched<ReadCardWithRetryResponse>> {
        let card_id = extract_card_id(card)?;

        let primary = self.endpoint(CARD_ENDPOINT, self.card_url(&card_id));
        let secondaries = [
            self.endpoint(COMMENTS_ENDPOINT, self.comments_url(&card_id)),
            self.endpoint(SUBTASKS_ENDPOINT, self.subtasks_url(&card_id)),
        ];

        let orchestration = orchestrator
            .run::<CardDetails>(&primary, &secondaries, config, fail_on_partial, cancel)
            .await;
        let (envelope, error) = reject_invalid_config(orchestration)?;

        info!(
            "[Businessmap] Read card {} (complete: {}, rate limit hits: {})",
            card_id,
            envelope.is_complete(),
            envelope.rate_limit_hits
        );
        Ok(Fetched {
            response: ReadCardWithRetryResponse { card_id, envelope },
            error,
        })
    }

    /// List cards matching a filter, retrying on rate limits.
    pub async fn get_cards_with_retry(
        &self,
        cancel: &CancellationToken,
        filter: &GetCardsRequest,
        config: RetryConfig,
        fail_on_partial: bool,
    ) -> Result<Fetched<GetCardsWithRetryResponse>> {
        let (filter_used, filter_values) = filter
            .primary_filter()
            .map(|(name, ids)| (name.to_string(), ids.to_vec()))
            .ok_or(ClientError::MissingFilter)?;

        let primary = self.endpoint(CARDS_ENDPOINT, self.cards_url(&filter.query_string()));
        let orchestration = Orchestrator::new()
            .run::<CardList>(&primary, &[], config, fail_on_partial, cancel)
            .await;
        let (envelope, error) = reject_invalid_config(orchestration)?;

        Ok(Fetched {
            response: GetCardsWithRetryResponse {
                filter_used,
                filter_values,
                attempts: envelope.attempts,
                wait_seconds: envelope.wait_seconds,
                rate_limit_hits: envelope.rate_limit_hits,
                completed: envelope.completed,
                partial_error: envelope.partial_error,
                cards: envelope.data.0,
            },
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARD_JSON: &str = r#"{
        "data": {
            "card_id": 42,
            "title": "Fix login",
            "description": "Users cannot log in",
            "created_at": "2024-01-02T03:04:05Z",
            "last_modified": "",
            "linked_cards": [{"card_id": 7, "link_type": "child"}],
            "custom_fields": null,
            "initiative_details": {
                "planned_start_date": "2024-02-01",
                "planned_end_date": "",
                "actual_start_time": "2024-02-03T00:00:00Z"
            }
        }
    }"#;

    #[test]
    fn test_merge_card_payload() {
        let mut details = CardDetails::default();
        details.merge_payload(CARD_ENDPOINT, CARD_JSON.as_bytes()).unwrap();

        assert_eq!(details.title, "Fix login");
        assert!(details.created_at.is_some());
        assert!(details.last_modified.is_none());
        assert_eq!(details.linked_cards.len(), 1);
        assert!(details.custom_fields.is_empty());
        assert_eq!(details.planned_start_date.as_deref(), Some("2024-02-01"));
        assert_eq!(details.planned_end_date, None);
        assert!(details.actual_start_time.is_some());
    }

    #[test]
    fn test_merge_comments_and_subtasks() {
        let mut details = CardDetails::default();
        details
            .merge_payload(
                COMMENTS_ENDPOINT,
                br#"{"data":[{"comment_id":1,"text":"hi","author_name":"sam","created_at":"2024-01-02 03:04:05"}]}"#,
            )
            .unwrap();
        details
            .merge_payload(
                SUBTASKS_ENDPOINT,
                br#"{"data":[{"subtask_id":2,"title":"a","finished":1},{"subtask_id":3,"title":"b","finished":0}]}"#,
            )
            .unwrap();

        assert_eq!(details.comments[0].author, "sam");
        assert!(details.comments[0].created_at.is_some());
        assert_eq!(details.subtasks.len(), 2);
        assert!(details.subtasks[0].completed);
        assert!(!details.subtasks[1].completed);
    }

    #[test]
    fn test_merge_rejects_unknown_endpoint_and_bad_json() {
        let mut details = CardDetails::default();
        assert!(details.merge_payload("attachments", b"{}").is_err());
        assert!(details.merge_payload(COMMENTS_ENDPOINT, b"<html>").is_err());

        let mut cards = CardList::default();
        assert!(cards.merge_payload(CARD_ENDPOINT, b"{}").is_err());
    }

    #[test]
    fn test_merge_card_list() {
        let mut cards = CardList::default();
        cards
            .merge_payload(
                CARDS_ENDPOINT,
                br#"{"data":{"pagination":{"all_pages":1},"data":[{"card_id":1,"title":"x","board_id":3}]}}"#,
            )
            .unwrap();
        assert_eq!(cards.0.len(), 1);
        assert_eq!(cards.0[0].board_id, 3);
    }

    #[test]
    fn test_read_card_response_flattens_envelope() {
        let response = ReadCardWithRetryResponse {
            card_id: "42".to_string(),
            envelope: ResultEnvelope::default(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["card_id"], "42");
        assert!(json["attempts"].is_object());
        assert!(json["data"].is_object());
        assert!(json.get("partial_error").is_none());
    }
}
