//! Wall-clock helpers shared by the event log and span tracker.
//!
//! Timestamps are epoch seconds as `f64` with microsecond resolution.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Current time as epoch seconds.
pub fn now_secs() -> f64 {
    to_secs(Utc::now())
}

pub fn to_secs(at: DateTime<Utc>) -> f64 {
    at.timestamp() as f64 + f64::from(at.timestamp_subsec_micros()) / 1_000_000.0
}

/// Convert epoch seconds back to a UTC datetime. Out-of-range input clamps to the epoch.
pub fn from_secs(secs: f64) -> DateTime<Utc> {
    let micros = (secs * 1_000_000.0).round() as i64;
    Utc.timestamp_micros(micros)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Fixed-width RFC 3339 (microseconds, `Z` suffix) so strings sort by time.
pub fn rfc3339(secs: f64) -> String {
    from_secs(secs).to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Milliseconds between two epoch-second timestamps, rounded to 2 decimals.
pub fn elapsed_ms(start: f64, end: f64) -> f64 {
    round2((end - start) * 1000.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
