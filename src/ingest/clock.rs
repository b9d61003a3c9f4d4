use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Wall clock that never runs backwards within this process.
///
/// Stamps are truncated to milliseconds, the precision readings are stored at.
/// If the system clock steps back, stamps hold at the last value handed out
/// until real time catches up.
#[derive(Default)]
pub struct IngestClock {
    last_millis: AtomicI64,
}

impl IngestClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let now_millis = now.timestamp_millis();
        let previous = self.last_millis.fetch_max(now_millis, Ordering::SeqCst);

        DateTime::from_timestamp_millis(previous.max(now_millis)).unwrap_or(now)
    }
}
