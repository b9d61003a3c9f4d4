// Live viewer fan-out

mod protocol;
#[cfg(test)]
mod tests;

pub use protocol::{SensorEvent, SensorUpdate};

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Lifecycle of one viewer connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerState {
    Connecting,
    Active,
    Closed,
}

/// Outcome of one `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

struct HubInner {
    /// viewer id → bounded outbound queue
    viewers: DashMap<u64, mpsc::Sender<Arc<SensorEvent>>>,
    next_id: AtomicU64,
    viewer_buffer: usize,
    dropped_total: AtomicU64,
}

/// Registry of connected viewers.
///
/// Cloning is cheap and every clone shares the same registry. Each viewer
/// owns a bounded queue; `publish` never waits on a viewer, and a viewer
/// whose queue is full or closed is dropped on the spot.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    /// `viewer_buffer` is the per-viewer queue depth (minimum 1).
    pub fn new(viewer_buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                viewers: DashMap::new(),
                next_id: AtomicU64::new(1),
                viewer_buffer: viewer_buffer.max(1),
                dropped_total: AtomicU64::new(0),
            }),
        }
    }

    /// Admit a new viewer. Its first queued event is the `connected` ack.
    pub fn register(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.viewer_buffer);

        let mut subscription = Subscription {
            id,
            state: ViewerState::Connecting,
            rx,
            hub: Arc::downgrade(&self.inner),
        };

        // Queue the ack before the viewer becomes visible to publishers so it
        // is always the first thing this viewer sees.
        if tx.try_send(Arc::new(SensorEvent::connected())).is_err() {
            warn!(viewer_id = id, "Failed to queue connected ack");
            subscription.state = ViewerState::Closed;
            return subscription;
        }

        self.inner.viewers.insert(id, tx);
        subscription.state = ViewerState::Active;

        info!(
            viewer_id = id,
            viewers = self.inner.viewers.len(),
            "Viewer registered"
        );
        subscription
    }

    /// Remove a viewer. The subscription is consumed and ends `Closed`.
    pub fn unregister(&self, mut subscription: Subscription) {
        subscription.close();
    }

    /// Fan an event out to every registered viewer.
    ///
    /// Works on a snapshot of the registry so no registry lock is held while
    /// queueing. Returns once every viewer has been handed the event or
    /// dropped.
    pub fn publish(&self, event: SensorEvent) -> PublishReport {
        let event = Arc::new(event);
        let snapshot: Vec<(u64, mpsc::Sender<Arc<SensorEvent>>)> = self
            .inner
            .viewers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut report = PublishReport::default();

        for (id, tx) in snapshot {
            match tx.try_send(Arc::clone(&event)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(viewer_id = id, "Viewer queue full, dropping viewer");
                    self.drop_viewer(id);
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(viewer_id = id, "Viewer connection closed, dropping viewer");
                    self.drop_viewer(id);
                    report.dropped += 1;
                }
            }
        }

        debug!(
            kind = event.kind(),
            delivered = report.delivered,
            dropped = report.dropped,
            "Published event"
        );
        report
    }

    /// Number of currently registered viewers
    pub fn viewer_count(&self) -> usize {
        self.inner.viewers.len()
    }

    /// Viewers dropped by `publish` since startup
    pub fn dropped_total(&self) -> u64 {
        self.inner.dropped_total.load(Ordering::Relaxed)
    }

    fn drop_viewer(&self, id: u64) {
        if self.inner.viewers.remove(&id).is_some() {
            self.inner.dropped_total.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A viewer's handle on the hub. Dropping it unregisters the viewer.
pub struct Subscription {
    id: u64,
    state: ViewerState,
    rx: mpsc::Receiver<Arc<SensorEvent>>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ViewerState {
        self.state
    }

    /// Next event for this viewer, in publish order.
    ///
    /// `None` means the hub dropped this viewer (or it was closed); the
    /// subscription is then `Closed` for good.
    pub async fn recv(&mut self) -> Option<Arc<SensorEvent>> {
        if self.state == ViewerState::Closed {
            return None;
        }
        let next = self.rx.recv().await;
        if next.is_none() {
            self.close();
        }
        next
    }

    fn close(&mut self) {
        if self.state == ViewerState::Closed {
            return;
        }
        self.state = ViewerState::Closed;
        self.rx.close();

        if let Some(hub) = self.hub.upgrade() {
            if hub.viewers.remove(&self.id).is_some() {
                info!(
                    viewer_id = self.id,
                    viewers = hub.viewers.len(),
                    "Viewer unregistered"
                );
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
