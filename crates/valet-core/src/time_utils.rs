//! Clock helpers shared across storage and runtime crates.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{SecondsFormat, Utc};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Unix-millisecond timestamp `delta` in the future.
pub fn unix_ms_after(delta: Duration) -> u64 {
    now_unix_ms().saturating_add(delta.as_millis() as u64)
}

/// Current UTC time rendered as RFC 3339 with millisecond precision.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
