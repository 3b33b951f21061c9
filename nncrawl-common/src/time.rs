//! Timestamp utilities
//!
//! Timestamps are stored in SQLite as fixed-width RFC 3339 UTC strings
//! (microsecond precision, `Z` suffix) so that lexical comparison in SQL
//! matches chronological order. Arithmetic saturates inside years
//! 0001..=9999, the range where that ordering holds.

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Earliest timestamp with a four-digit year
pub fn min_db_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Latest timestamp with a four-digit year
pub fn max_db_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Format a timestamp for storage
pub fn to_db_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp
pub fn from_db_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("Invalid timestamp '{}': {}", value, e)))
}

/// `ts - duration`, saturating at [`min_db_timestamp`]
pub fn checked_sub(ts: DateTime<Utc>, duration: std::time::Duration) -> DateTime<Utc> {
    let min = min_db_timestamp();
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| ts.checked_sub_signed(d))
        .map_or(min, |t| t.max(min))
}

/// `ts + duration`, saturating at [`max_db_timestamp`]
pub fn checked_add(ts: DateTime<Utc>, duration: std::time::Duration) -> DateTime<Utc> {
    let max = max_db_timestamp();
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| ts.checked_add_signed(d))
        .map_or(max, |t| t.min(max))
}
