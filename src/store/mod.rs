//! Durable reading history and per-fruit status.
//!
//! The pipeline only talks to [`ReadingStore`]; [`SqliteStore`] is the engine
//! the binary ships with.

use crate::reading::Reading;
use crate::rules::{Classification, Label};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

mod sqlite;

pub use sqlite::SqliteStore;

/// Persistence failures. Each one is fatal to the message being written only.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Latest known status of one monitored fruit.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FruitState {
    pub fruit_id: String,
    pub fruit_type: String,
    pub last_label: Label,
    pub last_seen_at: DateTime<Utc>,
}

/// A persisted reading together with the classification computed for it.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredReading {
    pub id: i64,
    pub reading: Reading,
    pub classification: Classification,
}

/// Aggregate counts for dashboards.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_readings: u64,
    pub active_fruits: u64,
    pub fresh_count: u64,
    pub warning_count: u64,
    pub rotten_count: u64,
}

/// Storage contract used by the ingestion coordinator and the query API.
///
/// Implementations must make `append_and_update` atomic: after it returns
/// `Err`, neither the reading nor the fruit status change is visible.
pub trait ReadingStore: Send + Sync {
    /// Appends the reading and creates/updates the fruit's status in one unit.
    fn append_and_update(
        &self,
        reading: &Reading,
        classification: &Classification,
    ) -> Result<(), StoreError>;

    /// Most recent reading per fruit (or for one fruit).
    fn latest(&self, fruit_id: Option<&str>) -> Result<Vec<StoredReading>, StoreError>;

    /// Readings observed within `since` of now, newest first, at most `limit`.
    fn history(
        &self,
        fruit_id: Option<&str>,
        since: Duration,
        limit: usize,
    ) -> Result<Vec<StoredReading>, StoreError>;

    fn fruits(&self) -> Result<Vec<FruitState>, StoreError>;

    fn fruit(&self, fruit_id: &str) -> Result<Option<FruitState>, StoreError>;

    fn stats(&self) -> Result<StoreStats, StoreError>;
}
