//! Rate-limit classification of HTTP outcomes.
//!
//! Only "too many requests" is worth waiting for. Every other non-success
//! status, and every transport failure, is fatal: retrying it would hide a
//! real problem and burn the wait budget that rate-limit recovery needs.

use std::fmt;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::Deserialize;

/// HTTP 429.
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Longest body excerpt kept in fatal error messages.
const MAX_BODY_EXCERPT: usize = 200;

/// A rate-limited response, kept for diagnostics.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RateLimitSignal {
    pub status: u16,
    /// Parsed `Retry-After`, zero when absent, past, or unparseable.
    pub retry_after: Duration,
    pub raw_body: String,
}

impl RateLimitSignal {
    pub fn new(retry_after: Duration) -> Self {
        Self {
            status: STATUS_TOO_MANY_REQUESTS,
            retry_after,
            raw_body: String::new(),
        }
    }
}

impl fmt::Display for RateLimitSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.retry_after.is_zero() {
            write!(f, "rate limit exceeded (HTTP {})", self.status)
        } else {
            write!(
                f,
                "rate limit exceeded (HTTP {}): retry after {:?}",
                self.status, self.retry_after
            )
        }
    }
}

impl std::error::Error for RateLimitSignal {}

/// A failure that must not be retried.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchFailure {
    /// HTTP status, `None` for transport-level failures.
    pub status: Option<u16>,
    pub message: String,
}

impl FetchFailure {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for FetchFailure {}

/// Result of a single fetch attempt.
#[derive(Clone, Debug)]
pub enum AttemptOutcome {
    Success(Bytes),
    RateLimited(RateLimitSignal),
    Fatal(FetchFailure),
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Error body shape used by the Businessmap API.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

/// Parse a `Retry-After` header value relative to the current time.
pub fn parse_retry_after(value: &str) -> Duration {
    parse_retry_after_at(value, SystemTime::now())
}

/// Parse a `Retry-After` header value relative to `now`.
///
/// Accepts a positive integer count of seconds or a date (IMF-fixdate,
/// RFC 850, asctime, or RFC 3339). A date in the past, a non-positive number,
/// or anything unparseable yields zero, which means "fall back to computed
/// backoff".
pub fn parse_retry_after_at(value: &str, now: SystemTime) -> Duration {
    let value = value.trim();
    if value.is_empty() {
        return Duration::ZERO;
    }

    if let Ok(seconds) = value.parse::<i64>() {
        return u64::try_from(seconds)
            .map(Duration::from_secs)
            .unwrap_or(Duration::ZERO);
    }

    let target = httpdate::parse_http_date(value).ok().or_else(|| {
        chrono::DateTime::parse_from_rfc3339(value)
            .ok()
            .map(SystemTime::from)
    });

    match target {
        Some(at) => at.duration_since(now).unwrap_or(Duration::ZERO),
        None => Duration::ZERO,
    }
}

/// Classify a completed HTTP exchange.
///
/// `retry_after` is the raw header value, if the response carried one.
pub fn classify_status(status: u16, retry_after: Option<&str>, body: Bytes) -> AttemptOutcome {
    if (200..300).contains(&status) {
        return AttemptOutcome::Success(body);
    }

    let text = String::from_utf8_lossy(&body);

    if status == STATUS_TOO_MANY_REQUESTS {
        return AttemptOutcome::RateLimited(RateLimitSignal {
            status,
            retry_after: retry_after.map(parse_retry_after).unwrap_or_default(),
            raw_body: text.into_owned(),
        });
    }

    let message = match serde_json::from_str::<ApiErrorBody>(&text) {
        Ok(ApiErrorBody {
            message: Some(message),
        }) => format!("API error (status {}): {}", status, message),
        _ => format!(
            "API request failed with status {}: {}",
            status,
            text.chars().take(MAX_BODY_EXCERPT).collect::<String>()
        ),
    };
    AttemptOutcome::Fatal(FetchFailure::http(status, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let cases = [
            ("60", Duration::from_secs(60)),
            (" 7 ", Duration::from_secs(7)),
            ("0", Duration::ZERO),
            ("-10", Duration::ZERO),
            ("", Duration::ZERO),
            ("abc", Duration::ZERO),
        ];
        for (header, expected) in cases {
            assert_eq!(parse_retry_after_at(header, now()), expected, "{:?}", header);
        }
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let header = httpdate::fmt_http_date(now() + Duration::from_secs(5));
        assert_eq!(parse_retry_after_at(&header, now()), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_retry_after_past_date_is_zero() {
        let header = httpdate::fmt_http_date(now() - Duration::from_secs(30));
        assert_eq!(parse_retry_after_at(&header, now()), Duration::ZERO);
    }

    #[test]
    fn test_parse_retry_after_rfc850_and_rfc3339() {
        // 1_700_000_000 is 2023-11-14T22:13:20Z.
        assert_eq!(
            parse_retry_after_at("Tuesday, 14-Nov-23 22:13:30 GMT", now()),
            Duration::from_secs(10)
        );
        assert_eq!(
            parse_retry_after_at("2023-11-14T22:14:20Z", now()),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_classify_success() {
        let outcome = classify_status(200, None, Bytes::from_static(b"{}"));
        assert!(outcome.is_success());
        assert!(classify_status(201, None, Bytes::new()).is_success());
    }

    #[test]
    fn test_classify_rate_limit_with_hint() {
        let outcome = classify_status(429, Some("3"), Bytes::from_static(b"slow down"));
        match outcome {
            AttemptOutcome::RateLimited(signal) => {
                assert_eq!(signal.status, 429);
                assert_eq!(signal.retry_after, Duration::from_secs(3));
                assert_eq!(signal.raw_body, "slow down");
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_rate_limit_without_hint() {
        match classify_status(429, None, Bytes::new()) {
            AttemptOutcome::RateLimited(signal) => {
                assert_eq!(signal.retry_after, Duration::ZERO);
                assert_eq!(signal.to_string(), "rate limit exceeded (HTTP 429)");
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_server_error_is_fatal() {
        let outcome = classify_status(503, Some("10"), Bytes::from_static(b"unavailable"));
        match outcome {
            AttemptOutcome::Fatal(failure) => {
                assert_eq!(failure.status, Some(503));
                assert_eq!(
                    failure.message,
                    "API request failed with status 503: unavailable"
                );
            }
            other => panic!("expected fatal, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_uses_api_error_message() {
        let body = Bytes::from_static(br#"{"message": "Card not found", "code": 404}"#);
        match classify_status(404, None, body) {
            AttemptOutcome::Fatal(failure) => {
                assert_eq!(failure.message, "API error (status 404): Card not found");
            }
            other => panic!("expected fatal, got {:?}", other),
        }
    }
}
