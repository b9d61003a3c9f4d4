// Ingestion pipeline: decode → classify → persist → broadcast

mod clock;
mod coordinator;
mod metrics;

pub use clock::IngestClock;
pub use coordinator::{Completion, IngestFailure, IngestionCoordinator};
pub use metrics::{IngestMetrics, IngestSnapshot};
