use super::{IngestClock, IngestMetrics, IngestSnapshot};
use crate::hub::{BroadcastHub, SensorEvent};
use crate::reading::{decode, DecodedReading, Reading, ReadingError};
use crate::rules::Classifier;
use crate::store::{ReadingStore, StoreError};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Why a message produced no event.
#[derive(Debug, Error)]
pub enum IngestFailure {
    #[error("rejected: {0}")]
    Rejected(#[from] ReadingError),

    #[error("failed to persist reading for '{fruit_id}': {source}")]
    Store {
        fruit_id: String,
        #[source]
        source: StoreError,
    },

    #[error("ingestion lane for '{0}' stopped before finishing")]
    LaneClosed(String),
}

/// Resolves once a submitted reading has been persisted and broadcast (or
/// has failed). Dropping it does not cancel the work.
pub struct Completion {
    fruit_id: String,
    rx: oneshot::Receiver<Result<SensorEvent, IngestFailure>>,
}

impl Completion {
    pub fn fruit_id(&self) -> &str {
        &self.fruit_id
    }

    pub async fn wait(self) -> Result<SensorEvent, IngestFailure> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(IngestFailure::LaneClosed(self.fruit_id)),
        }
    }
}

struct Job {
    reading: Reading,
    done: oneshot::Sender<Result<SensorEvent, IngestFailure>>,
}

/// Queue feeding the single worker task for one fruit.
struct Lane {
    id: u64,
    tx: mpsc::UnboundedSender<Job>,
}

struct Shared {
    classifier: RwLock<Arc<dyn Classifier>>,
    store: Arc<dyn ReadingStore>,
    hub: BroadcastHub,
    clock: IngestClock,
    lanes: DashMap<String, Lane>,
    next_lane_id: AtomicU64,
    lane_idle: Duration,
    metrics: IngestMetrics,
}

/// Sequences readings through classification, storage and broadcast.
///
/// Every fruit gets its own lane: an unbounded queue drained by one task, so
/// readings for the same fruit are applied strictly in submission order while
/// different fruits run in parallel. Jobs are only ever sent while holding the
/// lane's map entry, and an idle lane only retires itself under that same
/// entry once its queue is empty, so ordering survives lane turnover.
#[derive(Clone)]
pub struct IngestionCoordinator {
    shared: Arc<Shared>,
}

impl IngestionCoordinator {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        store: Arc<dyn ReadingStore>,
        hub: BroadcastHub,
        lane_idle: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                classifier: RwLock::new(classifier),
                store,
                hub,
                clock: IngestClock::new(),
                lanes: DashMap::new(),
                next_lane_id: AtomicU64::new(1),
                lane_idle,
                metrics: IngestMetrics::new(),
            }),
        }
    }

    /// Swap the classifier. Readings classified after this call use the new one.
    pub fn replace_classifier(&self, classifier: Arc<dyn Classifier>) {
        match self.shared.classifier.write() {
            Ok(mut current) => *current = classifier,
            Err(poisoned) => *poisoned.into_inner() = classifier,
        }
        info!("Classifier replaced");
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.shared.hub
    }

    pub fn metrics(&self) -> IngestSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Fruits that currently have a live lane
    pub fn active_lanes(&self) -> usize {
        self.shared.lanes.len()
    }

    /// Decode a raw message and queue it on its fruit's lane.
    ///
    /// Malformed payloads are logged, counted and returned as
    /// `IngestFailure::Rejected`; nothing is queued for them.
    pub fn submit(&self, subject: &str, payload: &[u8]) -> Result<Completion, IngestFailure> {
        let decoded = match decode(subject, payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(subject = %subject, error = %e, "Dropping malformed reading");
                self.shared.metrics.record_rejected();
                return Err(e.into());
            }
        };

        let fruit_id = decoded.fruit_id.clone();
        let (done, rx) = oneshot::channel();
        self.enqueue(decoded, done);

        Ok(Completion { fruit_id, rx })
    }

    /// Submit and wait for the outcome.
    pub async fn ingest(
        &self,
        subject: &str,
        payload: &[u8],
    ) -> Result<SensorEvent, IngestFailure> {
        self.submit(subject, payload)?.wait().await
    }

    fn enqueue(
        &self,
        decoded: DecodedReading,
        done: oneshot::Sender<Result<SensorEvent, IngestFailure>>,
    ) {
        let fruit_id = decoded.fruit_id.clone();
        let mut lane = self
            .shared
            .lanes
            .entry(fruit_id.clone())
            .or_insert_with(|| self.spawn_lane(&fruit_id));

        // Stamped under the entry lock so observedAt follows queue order
        let job = Job {
            reading: Reading::accept(decoded, self.shared.clock.stamp()),
            done,
        };

        if let Err(mpsc::error::SendError(job)) = lane.tx.send(job) {
            // Worker is gone without retiring (it panicked); start a new one
            warn!(fruit_id = %fruit_id, "Ingestion lane died, restarting");
            let replacement = self.spawn_lane(&fruit_id);
            let _ = replacement.tx.send(job);
            *lane = replacement;
        }
    }

    fn spawn_lane(&self, fruit_id: &str) -> Lane {
        let id = self.shared.next_lane_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        debug!(fruit_id = %fruit_id, lane_id = id, "Starting ingestion lane");
        tokio::spawn(run_lane(
            Arc::clone(&self.shared),
            fruit_id.to_string(),
            id,
            rx,
        ));

        Lane { id, tx }
    }
}

async fn run_lane(
    shared: Arc<Shared>,
    fruit_id: String,
    lane_id: u64,
    mut rx: mpsc::UnboundedReceiver<Job>,
) {
    loop {
        let job = match tokio::time::timeout(shared.lane_idle, rx.recv()).await {
            Ok(Some(job)) => job,
            Ok(None) => break,
            Err(_) => {
                let mut pending = None;
                let retired = shared
                    .lanes
                    .remove_if(&fruit_id, |_, lane| {
                        lane.id == lane_id
                            && match rx.try_recv() {
                                Ok(job) => {
                                    pending = Some(job);
                                    false
                                }
                                Err(_) => true,
                            }
                    })
                    .is_some();

                match pending {
                    Some(job) => job,
                    None if retired => {
                        debug!(fruit_id = %fruit_id, lane_id, "Retiring idle ingestion lane");
                        break;
                    }
                    None => continue,
                }
            }
        };

        let Job { reading, done } = job;
        let result = process(&shared, reading).await;
        let _ = done.send(result);
    }
}

async fn process(shared: &Shared, reading: Reading) -> Result<SensorEvent, IngestFailure> {
    let classifier = match shared.classifier.read() {
        Ok(current) => Arc::clone(&current),
        Err(poisoned) => Arc::clone(&poisoned.into_inner()),
    };

    let channels = reading.channels();
    let classification =
        classifier.classify(reading.fruit_type(), channels.r, channels.g, channels.b);

    let persisted = {
        let store = Arc::clone(&shared.store);
        let reading = reading.clone();
        tokio::task::spawn_blocking(move || store.append_and_update(&reading, &classification))
            .await
            .unwrap_or_else(|e| Err(StoreError::Unavailable(format!("store task failed: {}", e))))
    };

    if let Err(e) = persisted {
        error!(
            fruit_id = %reading.fruit_id(),
            reading_id = %reading.reading_id(),
            error = %e,
            "Failed to persist reading, dropping"
        );
        shared.metrics.record_store_failure();
        return Err(IngestFailure::Store {
            fruit_id: reading.fruit_id().to_string(),
            source: e,
        });
    }

    let event = SensorEvent::sensor_update(&reading, &classification);
    let report = shared.hub.publish(event.clone());
    shared.metrics.record_accepted();

    info!(
        fruit_id = %reading.fruit_id(),
        fruit_type = %reading.fruit_type(),
        label = %classification.label,
        viewers = report.delivered,
        "Reading ingested"
    );

    Ok(event)
}
