use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lifetime counters for the ingestion pipeline
#[derive(Clone, Default)]
pub struct IngestMetrics {
    accepted: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
    store_failures: Arc<AtomicU64>,
}

/// Point-in-time copy of [`IngestMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSnapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub store_failures: u64,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reading persisted and broadcast
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Payload failed decoding or range checks
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
        }
    }
}
