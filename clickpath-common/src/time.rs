//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Display format used for exported timestamps
pub const EXPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Milliseconds since the Unix epoch, as stored in the session store
pub fn to_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Inverse of [`to_millis`]; `None` for out-of-range values
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// Format a timestamp for spreadsheet export (UTC, second precision)
pub fn format_export(ts: &DateTime<Utc>) -> String {
    ts.format(EXPORT_TIMESTAMP_FORMAT).to_string()
}
