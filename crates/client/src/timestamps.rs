//! Timestamp parsing for the formats the Businessmap API emits.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Naive layouts seen on comment timestamps, interpreted as UTC.
const NAIVE_COMMENT_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Parse an optional RFC 3339 timestamp. Empty or malformed values are `None`.
pub fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a comment timestamp, trying RFC 3339 first and then naive layouts.
pub fn parse_comment_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Some(parsed) = parse_timestamp(Some(value)) {
        return Some(parsed);
    }
    NAIVE_COMMENT_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_rfc3339() {
        let parsed = parse_timestamp(Some("2024-03-01T10:15:00+02:00")).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 1, 8, 15, 0).unwrap());
        assert_eq!(parse_timestamp(Some("")), None);
        assert_eq!(parse_timestamp(None), None);
        assert_eq!(parse_timestamp(Some("yesterday")), None);
    }

    #[test]
    fn test_comment_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        for value in [
            "2024-01-02T03:04:05Z",
            "2024-01-02T03:04:05.000Z",
            "2024-01-02 03:04:05",
            "2024-01-02T03:04:05",
        ] {
            assert_eq!(parse_comment_timestamp(value), Some(expected), "{}", value);
        }
        assert_eq!(parse_comment_timestamp("02/01/2024"), None);
        assert_eq!(parse_comment_timestamp(""), None);
    }
}
