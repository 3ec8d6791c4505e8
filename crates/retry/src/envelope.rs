//! Result envelope assembled from endpoint results.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::endpoint::EndpointResult;
use crate::errors::RetryError;

/// A payload could not be folded into the result data.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MergeError(String);

impl MergeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn unknown_endpoint(endpoint: &str) -> Self {
        Self(format!("no handler for endpoint '{}'", endpoint))
    }
}

impl From<serde_json::Error> for MergeError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// Data that endpoint payloads are merged into.
///
/// Each endpoint owns a distinct name, so implementations can route on it
/// without worrying about merge order.
pub trait MergePayload: Default + Send {
    fn merge_payload(&mut self, endpoint: &str, payload: &[u8]) -> Result<(), MergeError>;
}

/// Generic JSON sink: each endpoint's document stored under its name.
impl MergePayload for BTreeMap<String, serde_json::Value> {
    fn merge_payload(&mut self, endpoint: &str, payload: &[u8]) -> Result<(), MergeError> {
        let value = serde_json::from_slice(payload)?;
        self.insert(endpoint.to_string(), value);
        Ok(())
    }
}

/// Structured report of one orchestration.
///
/// `completed[name]` is true exactly when that endpoint's payload was merged
/// into `data`; `partial_error` has an entry exactly for the others.
#[derive(Clone, Debug, Serialize)]
pub struct ResultEnvelope<T> {
    pub attempts: BTreeMap<String, u32>,
    pub wait_seconds: f64,
    pub rate_limit_hits: u32,
    pub completed: BTreeMap<String, bool>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub partial_error: BTreeMap<String, String>,
    pub data: T,
}

impl<T: Default> Default for ResultEnvelope<T> {
    fn default() -> Self {
        Self {
            attempts: BTreeMap::new(),
            wait_seconds: 0.0,
            rate_limit_hits: 0,
            completed: BTreeMap::new(),
            partial_error: BTreeMap::new(),
            data: T::default(),
        }
    }
}

impl<T: MergePayload> ResultEnvelope<T> {
    /// Record an endpoint's terminal result and merge its payload.
    ///
    /// Returns the endpoint's error when it did not complete, including a
    /// [`RetryError::Payload`] when a fetched payload failed to merge.
    pub fn record(&mut self, result: EndpointResult) -> Result<(), RetryError> {
        let EndpointResult {
            name,
            payload,
            attempts,
            rate_limit_hits,
            error,
            ..
        } = result;

        self.attempts.insert(name.clone(), attempts);
        self.rate_limit_hits += rate_limit_hits;

        let outcome = match (payload, error) {
            (_, Some(err)) => Err(err),
            (Some(payload), None) => {
                self.data
                    .merge_payload(&name, &payload)
                    .map_err(|e| RetryError::Payload {
                        endpoint: name.clone(),
                        message: e.to_string(),
                    })
            }
            (None, None) => Err(RetryError::Payload {
                endpoint: name.clone(),
                message: "no payload".to_string(),
            }),
        };

        match &outcome {
            Ok(()) => {
                self.completed.insert(name.clone(), true);
                self.partial_error.remove(&name);
            }
            Err(err) => {
                self.completed.insert(name.clone(), false);
                self.partial_error.insert(name, err.to_string());
            }
        }
        outcome
    }
}

impl<T> ResultEnvelope<T> {
    /// Set `wait_seconds` to the wall-clock time since `started`.
    pub fn finalize(&mut self, started: Instant) {
        let elapsed = started.elapsed().as_secs_f64();
        if elapsed > self.wait_seconds {
            self.wait_seconds = elapsed;
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.completed.is_empty() && self.completed.values().all(|done| *done)
    }

    /// Map the data while keeping the bookkeeping.
    pub fn map_data<U>(self, f: impl FnOnce(T) -> U) -> ResultEnvelope<U> {
        ResultEnvelope {
            attempts: self.attempts,
            wait_seconds: self.wait_seconds,
            rate_limit_hits: self.rate_limit_hits,
            completed: self.completed,
            partial_error: self.partial_error,
            data: f(self.data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::FetchFailure;
    use crate::endpoint::Termination;
    use bytes::Bytes;

    type JsonEnvelope = ResultEnvelope<BTreeMap<String, serde_json::Value>>;

    fn succeeded(name: &str, body: &'static [u8], attempts: u32, hits: u32) -> EndpointResult {
        EndpointResult {
            name: name.to_string(),
            payload: Some(Bytes::from_static(body)),
            attempts,
            rate_limit_hits: hits,
            termination: Termination::Succeeded,
            error: None,
        }
    }

    fn fatal(name: &str) -> EndpointResult {
        EndpointResult {
            name: name.to_string(),
            payload: None,
            attempts: 1,
            rate_limit_hits: 0,
            termination: Termination::Fatal,
            error: Some(RetryError::Fatal {
                endpoint: name.to_string(),
                attempts: 1,
                failure: FetchFailure::http(500, "boom"),
            }),
        }
    }

    #[test]
    fn test_record_success_merges_payload() {
        let mut envelope = JsonEnvelope::default();
        envelope
            .record(succeeded("card", br#"{"title":"A"}"#, 2, 1))
            .unwrap();

        assert_eq!(envelope.attempts["card"], 2);
        assert_eq!(envelope.rate_limit_hits, 1);
        assert!(envelope.completed["card"]);
        assert!(envelope.partial_error.is_empty());
        assert_eq!(envelope.data["card"]["title"], "A");
        assert!(envelope.is_complete());
    }

    #[test]
    fn test_record_failure_sets_partial_error() {
        let mut envelope = JsonEnvelope::default();
        let err = envelope.record(fatal("comments")).unwrap_err();

        assert!(!envelope.completed["comments"]);
        assert_eq!(envelope.partial_error["comments"], err.to_string());
        assert!(!envelope.data.contains_key("comments"));
        assert!(!envelope.is_complete());
    }

    #[test]
    fn test_unparseable_payload_is_not_completed() {
        let mut envelope = JsonEnvelope::default();
        let err = envelope
            .record(succeeded("subtasks", b"not json", 1, 0))
            .unwrap_err();

        assert!(matches!(err, RetryError::Payload { .. }));
        assert!(!envelope.completed["subtasks"]);
        assert!(envelope.partial_error["subtasks"].starts_with("failed to parse subtasks data"));
    }

    #[test]
    fn test_rate_limit_hits_sum_across_endpoints() {
        let mut envelope = JsonEnvelope::default();
        envelope.record(succeeded("card", b"{}", 3, 2)).unwrap();
        envelope.record(succeeded("comments", b"[]", 2, 1)).unwrap();
        assert_eq!(envelope.rate_limit_hits, 3);
    }

    #[test]
    fn test_serialization_omits_empty_partial_error() {
        let mut envelope = JsonEnvelope::default();
        envelope.record(succeeded("card", b"{}", 1, 0)).unwrap();
        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("partial_error").is_none());
        assert_eq!(json["attempts"]["card"], 1);
        assert_eq!(json["completed"]["card"], true);

        envelope.record(fatal("comments")).unwrap_err();
        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json["partial_error"]["comments"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalize_is_monotonic() {
        let started = Instant::now();
        let mut envelope = JsonEnvelope::default();
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        envelope.finalize(started);
        assert_eq!(envelope.wait_seconds, 2.0);

        envelope.finalize(Instant::now());
        assert_eq!(envelope.wait_seconds, 2.0);
    }

    #[test]
    fn test_map_data_keeps_bookkeeping() {
        let mut envelope = JsonEnvelope::default();
        envelope.record(succeeded("card", b"{}", 4, 3)).unwrap();
        let mapped = envelope.map_data(|data| data.len());
        assert_eq!(mapped.data, 1);
        assert_eq!(mapped.attempts["card"], 4);
        assert_eq!(mapped.rate_limit_hits, 3);
    }
}
