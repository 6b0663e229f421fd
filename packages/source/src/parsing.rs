//! Timestamp parsing for Socrata floating timestamps.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Naive formats tried in order. Socrata emits `T`-separated floating
/// timestamps with millisecond fractions; the others cover hand-edited or
/// re-exported values.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parses an ISO 8601 timestamp into a floating (timezone-less) datetime.
///
/// Accepts Socrata floating timestamps with or without fractional seconds,
/// a space instead of `T`, RFC 3339 values with an offset (the wall-clock
/// time as written is kept), and a bare date meaning midnight.
#[must_use]
pub fn parse_socrata_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
