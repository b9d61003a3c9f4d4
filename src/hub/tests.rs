use super::*;
use crate::reading::{decode, Reading};
use crate::rules::{Classifier, RuleTable};
use chrono::Utc;
use std::time::Duration;
use tokio::time::timeout;

fn update(fruit_id: &str, r: u8) -> SensorEvent {
    let payload = format!(
        r#"{{"fruitId":"{}","fruitType":"apple","colorSensor":{{"r":{},"g":50,"b":40}}}}"#,
        fruit_id, r
    );
    let reading = Reading::accept(decode("test", payload.as_bytes()).unwrap(), Utc::now());
    let classification = RuleTable::builtin().classify("apple", r, 50, 40);
    SensorEvent::sensor_update(&reading, &classification)
}

fn red(event: &Arc<SensorEvent>) -> u8 {
    match event.as_ref() {
        SensorEvent::SensorUpdate(u) => u.r,
        other => panic!("Expected sensor_update, got {:?}", other),
    }
}

async fn next(sub: &mut Subscription) -> Arc<SensorEvent> {
    timeout(Duration::from_secs(1), sub.recv())
        .await
        .expect("timed out waiting for event")
        .expect("subscription closed")
}

#[tokio::test]
async fn test_register_sends_connected_ack_first() {
    let hub = BroadcastHub::new(8);
    let mut sub = hub.register();

    assert_eq!(sub.state(), ViewerState::Active);
    assert_eq!(hub.viewer_count(), 1);
    assert_eq!(next(&mut sub).await.kind(), "connected");
}

#[tokio::test]
async fn test_connected_ack_only_goes_to_new_viewer() {
    let hub = BroadcastHub::new(8);
    let mut first = hub.register();
    assert_eq!(next(&mut first).await.kind(), "connected");

    let _second = hub.register();

    hub.publish(update("fruit_1", 180));
    assert_eq!(next(&mut first).await.kind(), "sensor_update");
}

#[tokio::test]
async fn test_publish_reaches_every_viewer() {
    let hub = BroadcastHub::new(8);
    let mut subs: Vec<Subscription> = (0..5).map(|_| hub.register()).collect();

    let report = hub.publish(update("fruit_1", 180));
    assert_eq!(report, PublishReport { delivered: 5, dropped: 0 });

    for sub in subs.iter_mut() {
        assert_eq!(next(sub).await.kind(), "connected");
        assert_eq!(red(&next(sub).await), 180);
    }
}

#[tokio::test]
async fn test_per_viewer_fifo() {
    let hub = BroadcastHub::new(32);
    let mut sub = hub.register();
    next(&mut sub).await;

    for r in 1..=20u8 {
        hub.publish(update("fruit_1", r));
    }

    for r in 1..=20u8 {
        assert_eq!(red(&next(&mut sub).await), r);
    }
}

#[tokio::test]
async fn test_full_viewer_is_dropped_without_affecting_others() {
    let hub = BroadcastHub::new(2);
    let mut slow = hub.register();
    let mut fast = hub.register();

    // slow never reads: ack + one update fill its queue
    hub.publish(update("fruit_1", 1));
    assert_eq!(next(&mut fast).await.kind(), "connected");
    assert_eq!(red(&next(&mut fast).await), 1);

    let report = hub.publish(update("fruit_1", 2));
    assert_eq!(report, PublishReport { delivered: 1, dropped: 1 });
    assert_eq!(hub.viewer_count(), 1);
    assert_eq!(hub.dropped_total(), 1);
    assert_eq!(red(&next(&mut fast).await), 2);

    // The dropped viewer drains what was queued, then sees the end
    assert_eq!(next(&mut slow).await.kind(), "connected");
    assert_eq!(red(&next(&mut slow).await), 1);
    assert!(slow.recv().await.is_none());
    assert_eq!(slow.state(), ViewerState::Closed);
}

#[tokio::test]
async fn test_closed_viewer_is_dropped_on_publish() {
    let hub = BroadcastHub::new(8);
    let mut broken = hub.register();
    let mut healthy = hub.register();

    // Simulate a connection that died without unregistering
    broken.rx.close();

    let report = hub.publish(update("fruit_1", 180));
    assert_eq!(report, PublishReport { delivered: 1, dropped: 1 });
    assert_eq!(hub.viewer_count(), 1);

    assert_eq!(next(&mut healthy).await.kind(), "connected");
    assert_eq!(red(&next(&mut healthy).await), 180);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_viewer_disconnecting_during_publish_does_not_block_others() {
    let hub = BroadcastHub::new(16);
    let leaving = hub.register();
    let mut handles = Vec::new();

    for _ in 0..4 {
        let mut sub = hub.register();
        handles.push(tokio::spawn(async move {
            loop {
                match sub.recv().await {
                    // Hand the subscription back so the viewer stays registered
                    Some(event) if event.kind() == "sensor_update" => return (red(&event), sub),
                    Some(_) => continue,
                    None => panic!("viewer dropped unexpectedly"),
                }
            }
        }));
    }

    let publisher = {
        let hub = hub.clone();
        tokio::spawn(async move { hub.publish(update("fruit_1", 77)) })
    };
    drop(leaving);
    publisher.await.unwrap();

    let mut viewers = Vec::new();
    for handle in handles {
        let (r, sub) = timeout(Duration::from_secs(1), handle)
            .await
            .expect("viewer did not receive event in time")
            .unwrap();
        assert_eq!(r, 77);
        viewers.push(sub);
    }
    assert_eq!(hub.viewer_count(), 4);

    drop(viewers);
    assert_eq!(hub.viewer_count(), 0);
}

#[tokio::test]
async fn test_unregister_and_drop_remove_viewer() {
    let hub = BroadcastHub::new(8);
    let a = hub.register();
    let b = hub.register();
    assert_eq!(hub.viewer_count(), 2);

    hub.unregister(a);
    assert_eq!(hub.viewer_count(), 1);

    drop(b);
    assert_eq!(hub.viewer_count(), 0);

    let report = hub.publish(update("fruit_1", 180));
    assert_eq!(report, PublishReport::default());
}

#[tokio::test]
async fn test_registrations_get_distinct_ids() {
    let hub = BroadcastHub::new(8);
    let a = hub.register();
    let b = hub.register();
    assert_ne!(a.id(), b.id());
}

#[test]
fn test_sensor_update_wire_format() {
    let event = update("fruit_1", 180);
    let json = serde_json::to_value(&event).unwrap();

    assert_eq!(json["type"], "sensor_update");
    assert_eq!(json["fruitId"], "fruit_1");
    assert_eq!(json["fruitType"], "apple");
    assert_eq!(json["label"], "Fresh");
    assert_eq!(json["r"], 180);
    assert_eq!(json["g"], 50);
    assert_eq!(json["b"], 40);
    assert!(json.get("temperature").is_none());
    assert!(json.get("humidity").is_none());
    assert!(json["observedAt"].is_string());
    assert!(json["readingId"].is_string());
}

#[test]
fn test_connected_wire_format() {
    let json = serde_json::to_value(SensorEvent::connected()).unwrap();
    assert_eq!(json["type"], "connected");
    assert!(json["message"].is_string());
}
