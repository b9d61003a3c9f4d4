use crate::ingest::IngestionCoordinator;
use anyhow::{bail, Result};
use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

/// Feed every inbound message to the coordinator.
///
/// Messages are submitted in the order NATS delivers them; the coordinator
/// takes care of per-fruit ordering and concurrency. Bad payloads are dropped
/// inside `submit`. Returns an error only when the subscription itself ends,
/// which means the transport is gone.
pub async fn run_subscriber<S>(mut messages: S, coordinator: IngestionCoordinator) -> Result<()>
where
    S: Stream<Item = async_nats::Message> + Unpin,
{
    info!("Reading subscriber started");

    while let Some(msg) = messages.next().await {
        // Failures are already logged and counted by the coordinator
        if let Err(e) = coordinator.submit(msg.subject.as_str(), &msg.payload) {
            debug!(subject = %msg.subject, error = %e, "Reading not queued");
        }
    }

    warn!("Reading subscription ended");
    bail!("NATS subscription closed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::BroadcastHub;
    use crate::rules::RuleTable;
    use crate::store::{ReadingStore, SqliteStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn message(subject: &str, payload: &str) -> async_nats::Message {
        async_nats::Message {
            subject: subject.into(),
            reply: None,
            payload: payload.as_bytes().to_vec().into(),
            headers: None,
            status: None,
            description: None,
            length: payload.len(),
        }
    }

    #[tokio::test]
    async fn test_subscriber_feeds_coordinator_and_reports_end() {
        let store = Arc::new(SqliteStore::open(":memory:").unwrap());
        let coordinator = IngestionCoordinator::new(
            Arc::new(RuleTable::builtin()),
            store.clone(),
            BroadcastHub::new(8),
            Duration::from_secs(60),
        );
        let mut viewer = coordinator.hub().register();

        let messages = futures::stream::iter(vec![
            message(
                "sigma.sensors.fruit_1",
                r#"{"fruitId":"fruit_1","fruitType":"apple","colorSensor":{"r":180,"g":50,"b":40}}"#,
            ),
            message("sigma.sensors.fruit_2", "garbage"),
            message(
                "sigma.sensors.fruit_3",
                r#"{"fruitId":"fruit_3","fruitType":"apple","colorSensor":{"r":10,"g":10,"b":10}}"#,
            ),
        ]);

        let result = run_subscriber(messages, coordinator.clone()).await;
        assert!(result.is_err());

        // connected ack + two accepted readings
        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(1), viewer.recv())
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(store.fruits().unwrap().len(), 2);
        assert_eq!(coordinator.metrics().rejected, 1);
    }
}
