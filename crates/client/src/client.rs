//! HTTP access to the Businessmap (Kanbanize) v2 API.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;

use businessmap_retry::{classify_status, AttemptOutcome, FetchFailure, Fetcher};

use crate::errors::{ClientError, Result};
use crate::models::{
    AddCommentData, AddCommentRequest, AddCommentResponse, CardDataResponse, CardDetails,
    CommentsResponse, SubtasksResponse,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const API_KEY_HEADER: &str = "apikey";
/// Path of the v2 API below the configured host.
const API_PATH: &str = "/api/v2";

lazy_static! {
    static ref CARD_URL_REGEX: Regex =
        Regex::new(r"/c(?:tr|r)l_board/\d+/cards/(\d+)(?:/.*)?").expect("valid card URL regex");
}

/// Accept either a bare card ID or a board URL pointing at a card.
pub fn extract_card_id(input: &str) -> Result<String> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ClientError::EmptyCardId);
    }
    if !input.contains("http") && !input.contains('/') {
        return Ok(input.to_string());
    }
    CARD_URL_REGEX
        .captures(input)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ClientError::InvalidCardUrl(input.to_string()))
}

/// Businessmap API client. Cheap to clone.
#[derive(Clone, Debug)]
pub struct BusinessmapClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl BusinessmapClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn card_url(&self, card_id: &str) -> String {
        format!("{}{}/cards/{}", self.base_url, API_PATH, card_id)
    }

    pub(crate) fn comments_url(&self, card_id: &str) -> String {
        format!("{}{}/cards/{}/comments", self.base_url, API_PATH, card_id)
    }

    pub(crate) fn subtasks_url(&self, card_id: &str) -> String {
        format!("{}{}/cards/{}/subtasks", self.base_url, API_PATH, card_id)
    }

    pub(crate) fn cards_url(&self, query: &str) -> String {
        format!("{}{}/cards?{}", self.base_url, API_PATH, query)
    }

    /// Perform one request and classify the response.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> AttemptOutcome {
        let mut builder = self
            .client
            .request(method.clone(), url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("[Businessmap] {} {} failed: {}", method, url, e);
                return AttemptOutcome::Fatal(FetchFailure::transport(format!(
                    "failed to execute request: {}",
                    e
                )));
            }
        };

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                return AttemptOutcome::Fatal(FetchFailure::transport(format!(
                    "failed to read response body: {}",
                    e
                )));
            }
        };

        debug!("[Businessmap] {} {} -> {}", method, url, status);
        classify_status(status, retry_after.as_deref(), body)
    }

    /// Single GET attempt.
    pub async fn get(&self, url: &str) -> AttemptOutcome {
        self.request(Method::GET, url, None).await
    }

    /// Fetch a card once, together with its comments and subtasks.
    ///
    /// The card itself must load. Comments and subtasks that fail to load
    /// degrade to empty lists.
    pub async fn read_card(&self, card: &str) -> Result<CardDetails> {
        let card_id = extract_card_id(card)?;

        let payload = into_payload(self.get(&self.card_url(&card_id)).await)?;
        let card: CardDataResponse = parse(&payload, "card")?;
        let mut details = CardDetails::default();
        details.apply_card(card.data);

        let comments_url = self.comments_url(&card_id);
        let subtasks_url = self.subtasks_url(&card_id);
        let (comments, subtasks) =
            futures::future::join(self.get(&comments_url), self.get(&subtasks_url)).await;

        match into_payload(comments).and_then(|p| parse::<CommentsResponse>(&p, "comments")) {
            Ok(comments) => details.comments = comments.data.into_iter().map(Into::into).collect(),
            Err(e) => warn!("[Businessmap] Comments for card {} unavailable: {}", card_id, e),
        }
        match into_payload(subtasks).and_then(|p| parse::<SubtasksResponse>(&p, "subtasks")) {
            Ok(subtasks) => details.subtasks = subtasks.data.into_iter().map(Into::into).collect(),
            Err(e) => warn!("[Businessmap] Subtasks for card {} unavailable: {}", card_id, e),
        }

        Ok(details)
    }

    /// Post a comment on a card.
    pub async fn add_card_comment(&self, card: &str, text: &str) -> Result<AddCommentData> {
        let card_id = extract_card_id(card)?;
        if text.trim().is_empty() {
            return Err(ClientError::EmptyComment);
        }

        let body = serde_json::to_value(AddCommentRequest { text }).map_err(|source| {
            ClientError::Parse {
                what: "comment request",
                source,
            }
        })?;
        let outcome = self
            .request(Method::POST, &self.comments_url(&card_id), Some(&body))
            .await;
        let payload = into_payload(outcome)?;
        let response: AddCommentResponse = parse(&payload, "comment response")?;
        Ok(response.data)
    }
}

/// Fetcher for one fixed URL, so a retry loop can drive it.
pub struct CardEndpoint {
    client: BusinessmapClient,
    url: String,
}

impl CardEndpoint {
    pub fn new(client: BusinessmapClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Fetcher for CardEndpoint {
    async fn fetch(&self) -> AttemptOutcome {
        self.client.get(&self.url).await
    }
}

fn into_payload(outcome: AttemptOutcome) -> Result<Bytes> {
    match outcome {
        AttemptOutcome::Success(body) => Ok(body),
        AttemptOutcome::RateLimited(signal) => Err(ClientError::RateLimited(signal)),
        AttemptOutcome::Fatal(failure) => Err(ClientError::Api(failure)),
    }
}

fn parse<T: DeserializeOwned>(payload: &[u8], what: &'static str) -> Result<T> {
    serde_json::from_slice(payload).map_err(|source| ClientError::Parse { what, source })
}
