//! Businessmap API payloads and the public card types built from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Treat an explicit JSON `null` like a missing field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ─────────────────────────────────────────────────────────────────────────────
// Public types
// ─────────────────────────────────────────────────────────────────────────────

/// Everything known about a card, assembled from the card, comments and
/// subtasks endpoints.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CardDetails {
    pub title: String,
    pub description: String,
    pub subtasks: Vec<Subtask>,
    pub comments: Vec<Comment>,
    pub linked_cards: Vec<LinkedCard>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub custom_fields: Vec<CustomField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_current_position_since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_request_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_request_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planned_start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planned_end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_end_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub completed: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Comment {
    pub id: String,
    pub text: String,
    pub author: String,
    /// `None` when the API sent a timestamp in none of the known formats.
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkedCard {
    pub card_id: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub link_type: String,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "String::is_empty")]
    pub title: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomField {
    pub field_id: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// A card as returned by the card listing endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CardSummary {
    pub card_id: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub title: String,
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    #[serde(default)]
    pub board_id: i64,
    #[serde(default)]
    pub lane_id: i64,
    #[serde(default)]
    pub workflow_id: i64,
}

/// Filter for the card listing endpoint. At least one list must be non-empty.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GetCardsRequest {
    pub board_ids: Vec<i64>,
    pub lane_ids: Vec<i64>,
    pub workflow_ids: Vec<i64>,
    pub card_ids: Vec<i64>,
}

impl GetCardsRequest {
    /// Filter lists in query-string order.
    fn filters(&self) -> [(&'static str, &[i64]); 4] {
        [
            ("board_ids", &self.board_ids),
            ("lane_ids", &self.lane_ids),
            ("workflow_ids", &self.workflow_ids),
            ("card_ids", &self.card_ids),
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.filters().iter().all(|(_, ids)| ids.is_empty())
    }

    /// The first non-empty filter, which is what gets reported back.
    pub fn primary_filter(&self) -> Option<(&'static str, &[i64])> {
        self.filters().into_iter().find(|(_, ids)| !ids.is_empty())
    }

    /// `board_ids=1,2&lane_ids=3`, empty filters omitted.
    pub fn query_string(&self) -> String {
        self.filters()
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(name, ids)| {
                let joined = ids
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{}={}", name, joined)
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Result of posting a comment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddCommentData {
    pub comment_id: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub text: String,
    #[serde(default, deserialize_with = "nullable")]
    pub author_name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub created_date: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// API Response Types (internal)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct CardDataResponse {
    pub data: CardData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct CardData {
    #[allow(dead_code)]
    pub card_id: i64,
    #[serde(deserialize_with = "nullable")]
    pub title: String,
    #[serde(deserialize_with = "nullable")]
    pub description: String,
    #[serde(deserialize_with = "nullable")]
    pub linked_cards: Vec<LinkedCard>,
    #[serde(deserialize_with = "nullable")]
    pub custom_fields: Vec<CustomField>,
    pub created_at: Option<String>,
    pub last_modified: Option<String>,
    pub in_current_position_since: Option<String>,
    pub first_request_time: Option<String>,
    pub first_start_time: Option<String>,
    pub first_end_time: Option<String>,
    pub last_request_time: Option<String>,
    pub last_start_time: Option<String>,
    pub last_end_time: Option<String>,
    pub initiative_details: Option<InitiativeDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct InitiativeDetails {
    pub planned_start_date: Option<String>,
    pub planned_end_date: Option<String>,
    pub actual_start_time: Option<String>,
    pub actual_end_time: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentsResponse {
    #[serde(default, deserialize_with = "nullable")]
    pub data: Vec<CommentData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentData {
    pub comment_id: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub text: String,
    #[serde(default, deserialize_with = "nullable")]
    pub author_name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubtasksResponse {
    #[serde(default, deserialize_with = "nullable")]
    pub data: Vec<SubtaskData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubtaskData {
    pub subtask_id: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub title: String,
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    #[serde(default)]
    pub finished: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct AddCommentRequest<'a> {
    pub text: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AddCommentResponse {
    pub data: AddCommentData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GetCardsResponse {
    pub data: CardsPage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CardsPage {
    #[allow(dead_code)]
    #[serde(default)]
    pub pagination: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub data: Vec<CardSummary>,
}

impl From<CommentData> for Comment {
    fn from(data: CommentData) -> Self {
        Self {
            id: data.comment_id.to_string(),
            text: data.text,
            author: data.author_name,
            created_at: crate::timestamps::parse_comment_timestamp(&data.created_at),
        }
    }
}

impl From<SubtaskData> for Subtask {
    fn from(data: SubtaskData) -> Self {
        Self {
            id: data.subtask_id.to_string(),
            title: data.title,
            description: data.description,
            completed: data.finished == 1,
        }
    }
}
