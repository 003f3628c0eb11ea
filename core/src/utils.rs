use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;
use chrono::{DateTime, Utc};

pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn format_timestamp(timestamp: u64) -> String {
    let dt = DateTime::from_timestamp(timestamp as i64, 0)
        .unwrap_or_else(|| Utc::now());
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// RFC 3339 with microseconds, or `None` if the capture clock is out of range.
pub fn format_capture_time(ts_sec: u64, ts_usec: u32) -> Option<String> {
    let secs = i64::try_from(ts_sec).ok()?;
    let dt = DateTime::from_timestamp(secs, ts_usec.min(999_999) * 1_000)?;
    Some(dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string())
}
