use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Current time truncated to whole milliseconds, the precision credential snapshots persist.
pub fn now_millis() -> DateTime<Utc> {
    truncate_to_millis(Utc::now())
}

pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

pub fn get_instant() -> Instant {
    Instant::now()
}
