//! Timestamp helpers for session metadata and the `_ts` message field.
//!
//! Timestamps are stored as strings. New values are written as RFC 3339 in
//! UTC; readers also accept naive ISO-8601 (no offset), which is taken as UTC.

use std::cmp::Ordering;
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

/// Current time as an RFC 3339 string.
#[must_use]
pub fn now() -> String {
    format(OffsetDateTime::now_utc())
}

/// Format an instant as RFC 3339.
#[must_use]
pub fn format(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_default()
}

/// Parse a stored timestamp, returning `None` when it is not a valid date.
#[must_use]
pub fn parse(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(at) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(at);
    }
    PrimitiveDateTime::parse(raw, &Iso8601::DEFAULT)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// Compare two stored timestamps.
///
/// Both parse: compared as instants. Otherwise the raw strings are compared,
/// which orders ISO-8601 values of the same shape correctly.
#[must_use]
pub fn compare(a: &str, b: &str) -> Ordering {
    match (parse(a), parse(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

/// True when `ts` is not later than `cutoff`.
#[must_use]
pub fn is_at_or_before(ts: &str, cutoff: &str) -> bool {
    compare(ts, cutoff) != Ordering::Greater
}

/// Shift a stored timestamp, returning `None` if it cannot be parsed.
#[must_use]
pub fn shifted(raw: &str, by: Duration) -> Option<String> {
    parse(raw).map(|at| format(at + by))
}
