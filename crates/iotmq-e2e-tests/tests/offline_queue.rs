//! E2E tests for publishing through outages: queueing, overflow, and draining.

mod helpers;

use std::time::Duration;

use helpers::TestHarness;
use iotmq_mqtt_channel::{ConnectionState, ManagerConfig, QueueFullPolicy};
use iotmq_protocol::Qos;

async fn publish_all(h: &TestHarness, topics: &[&str]) {
    for topic in topics {
        h.manager
            .publish(topic, topic.as_bytes(), Qos::AtLeastOnce)
            .await
            .unwrap();
    }
}

/// Messages published while reconnecting go out in order, once each,
/// spaced by the draining interval.
#[tokio::test(start_paused = true)]
async fn e2e_queue_drains_fifo_after_reconnect() {
    let h = TestHarness::with_defaults();
    h.connect().await;
    h.drop_connection("wifi down").await;

    publish_all(&h, &["t/1", "t/2", "t/3"]).await;
    assert_eq!(h.queued_topics().await, vec!["t/1", "t/2", "t/3"]);
    assert!(h.mock.published().is_empty());

    h.wait_for(ConnectionState::Connected).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let published = h.mock.published();
    assert_eq!(h.published_topics(), vec!["t/1", "t/2", "t/3"]);
    for pair in published.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_millis(250));
    }
    assert!(h.queued_topics().await.is_empty());
}

/// A full queue evicts the oldest message by default.
#[tokio::test(start_paused = true)]
async fn e2e_overflow_keeps_newest() {
    let h = TestHarness::new(ManagerConfig {
        offline_queue_bound: 3,
        ..ManagerConfig::default()
    });
    h.connect().await;
    h.drop_connection("wifi down").await;

    publish_all(&h, &["t/1", "t/2", "t/3", "t/4", "t/5"]).await;
    assert_eq!(h.queued_topics().await, vec!["t/3", "t/4", "t/5"]);

    h.wait_for(ConnectionState::Connected).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.published_topics(), vec!["t/3", "t/4", "t/5"]);
}

/// With `keep_oldest`, messages arriving at a full queue are discarded.
#[tokio::test(start_paused = true)]
async fn e2e_overflow_keeps_oldest() {
    let h = TestHarness::new(ManagerConfig {
        offline_queue_bound: 3,
        queue_full_policy: QueueFullPolicy::KeepOldest,
        ..ManagerConfig::default()
    });
    h.connect().await;
    h.drop_connection("wifi down").await;

    publish_all(&h, &["t/1", "t/2", "t/3", "t/4", "t/5"]).await;
    assert_eq!(h.queued_topics().await, vec!["t/1", "t/2", "t/3"]);
}

/// A queued message the broker rejects is dropped and draining pauses
/// until the next publish.
#[tokio::test(start_paused = true)]
async fn e2e_drain_failure_drops_message() {
    let h = TestHarness::with_defaults();
    h.connect().await;
    h.drop_connection("wifi down").await;
    publish_all(&h, &["t/1", "t/2", "t/3"]).await;
    h.mock.fail_publish("t/2");

    h.wait_for(ConnectionState::Connected).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(h.published_topics(), vec!["t/1"]);
    assert_eq!(h.queued_topics().await, vec!["t/3"]);

    // The next publish queues behind t/3 and restarts the drain.
    publish_all(&h, &["t/4"]).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.published_topics(), vec!["t/1", "t/3", "t/4"]);
    assert!(h.queued_topics().await.is_empty());
}

/// Publishing while a drain is in progress keeps FIFO order.
#[tokio::test(start_paused = true)]
async fn e2e_live_publish_waits_behind_queue() {
    let h = TestHarness::with_defaults();
    h.connect().await;
    h.drop_connection("wifi down").await;
    publish_all(&h, &["t/1", "t/2", "t/3"]).await;

    h.wait_for(ConnectionState::Connected).await;
    publish_all(&h, &["live"]).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(h.published_topics(), vec!["t/1", "t/2", "t/3", "live"]);
}

/// Disconnecting mid-drain stops it; what is left stays queued.
#[tokio::test(start_paused = true)]
async fn e2e_disconnect_stops_drain() {
    let h = TestHarness::with_defaults();
    h.connect().await;
    h.drop_connection("wifi down").await;
    publish_all(&h, &["t/1", "t/2", "t/3"]).await;

    h.wait_for(ConnectionState::Connected).await;
    h.manager.disconnect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(h.published_topics(), vec!["t/1"]);
    assert_eq!(h.queued_topics().await, vec!["t/2", "t/3"]);
}

/// With queueing disabled, offline publishes fail immediately.
#[tokio::test(start_paused = true)]
async fn e2e_queue_disabled_rejects_offline_publish() {
    let h = TestHarness::new(ManagerConfig {
        offline_queue_enabled: false,
        ..ManagerConfig::default()
    });
    h.connect().await;
    h.drop_connection("wifi down").await;

    let err = h
        .manager
        .publish("t/1", "x", Qos::AtLeastOnce)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not connected"));
    assert!(h.queued_topics().await.is_empty());
}
