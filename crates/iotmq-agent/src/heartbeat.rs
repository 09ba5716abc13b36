//! Periodic heartbeat publisher.
//!
//! Sends a `Heartbeat` message at a configurable interval so the cloud
//! knows the device is alive. Heartbeats published while the connection
//! is down wait in the manager's offline queue.

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time;

use iotmq_mqtt_channel::{ConnectionState, MqttManager};
use iotmq_protocol::Qos;

/// Heartbeat payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Heartbeat {
    pub client_id: String,
    pub uptime_secs: u64,
    /// Whether the manager was connected when the heartbeat was built.
    pub connected: bool,
    pub agent_version: String,
    pub timestamp: DateTime<Utc>,
}

impl Heartbeat {
    pub fn new(client_id: &str, uptime: Duration, state: ConnectionState) -> Self {
        Self {
            client_id: client_id.to_string(),
            uptime_secs: uptime.as_secs(),
            connected: state == ConnectionState::Connected,
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Serialize and publish one heartbeat.
///
/// Encoding failures carry their own context; manager failures pass
/// through as the underlying `MqttError`.
pub async fn publish(
    manager: &MqttManager,
    topic: &str,
    heartbeat: &Heartbeat,
) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(heartbeat).context("encoding heartbeat")?;
    manager.publish(topic, payload, Qos::AtLeastOnce).await?;
    Ok(())
}

/// Run the heartbeat loop, publishing at `interval`.
///
/// This function runs forever until the task is cancelled. Intended
/// to be raced against the shutdown signal.
pub async fn run(
    manager: &MqttManager,
    topic: &str,
    client_id: &str,
    interval: Duration,
    start_time: time::Instant,
) {
    let mut ticker = time::interval(interval);
    // Skip the first tick (fires immediately).
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let heartbeat = Heartbeat::new(client_id, start_time.elapsed(), manager.state());
        if let Err(e) = publish(manager, topic, &heartbeat).await {
            tracing::warn!(error = %format_args!("{e:#}"), "failed to publish heartbeat");
        } else {
            tracing::debug!(
                uptime_secs = heartbeat.uptime_secs,
                connected = heartbeat.connected,
                "heartbeat sent"
            );
        }
    }
}
