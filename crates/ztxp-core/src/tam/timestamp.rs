//! `issued_at` wire format: UTC, second precision, `%Y-%m-%dT%H:%M:%SZ`.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};

pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Format a timestamp in the fixed wire format.
pub fn format(ts: &DateTime<Utc>) -> String {
    ts.format(FORMAT).to_string()
}

/// Parse a wire timestamp.
///
/// The fixed format is tried first; RFC 3339 is accepted as a fallback and
/// truncated to whole seconds.
pub fn parse(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .and_then(|dt| DateTime::from_timestamp(dt.timestamp(), 0))
}

/// Truncate to whole seconds.
pub fn truncate(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.timestamp(), 0).unwrap_or(ts)
}

pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format(ts))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_is_second_precision() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).unwrap();
        assert_eq!(format(&ts), "2026-03-01T12:30:05Z");
    }

    #[test]
    fn test_parse_fixed_format() {
        let ts = parse("2026-03-01T12:30:05Z").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).unwrap());
    }

    #[test]
    fn test_parse_rfc3339_fallback_truncates() {
        let ts = parse("2026-03-01T13:30:05.987+01:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("yesterday").is_none());
        assert!(parse("").is_none());
    }
}
