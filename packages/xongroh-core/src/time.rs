//! Time helpers.
//!
//! All entity timestamps are Unix milliseconds (`i64`), the unit the feed
//! cursors are keyed on.

use chrono::{DateTime, TimeZone, Utc};

/// Returns the current Unix timestamp in milliseconds.
pub fn now_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Formats a millisecond timestamp as RFC 3339, or `None` if out of range.
pub fn to_rfc3339(millis: i64) -> Option<String> {
    to_datetime(millis).map(|dt| dt.to_rfc3339())
}

/// Converts a millisecond timestamp to a UTC datetime.
pub fn to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_timestamp_millis_is_reasonable() {
        let ts = now_timestamp_millis();
        // Should be after 2024-01-01 in millis
        assert!(ts > 1_704_067_200_000, "Timestamp {} is too old", ts);
    }

    #[test]
    fn test_rfc3339_formatting() {
        assert_eq!(
            to_rfc3339(0).as_deref(),
            Some("1970-01-01T00:00:00+00:00")
        );
        assert!(to_rfc3339(i64::MAX).is_none());
    }
}
