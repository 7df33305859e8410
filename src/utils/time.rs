// src/utils/time.rs
//! UTC timestamp helpers.

use chrono::{SecondsFormat, Utc};

/// Current time as RFC 3339 with millisecond precision and a `Z` suffix,
/// e.g. `2024-05-01T12:30:00.123Z`.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time in whole seconds since the Unix epoch.
pub fn now_unix() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc3339_shape() {
        let ts = now_rfc3339();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2024-05-01T12:30:00.123Z".len());
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
