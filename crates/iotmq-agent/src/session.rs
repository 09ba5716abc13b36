//! Agent session: manager loop, connect, and configured subscriptions.

use iotmq_mqtt_channel::{MqttManager, Transport};
use tokio::task::JoinHandle;

use crate::config::AgentConfig;

/// A running manager plus the task driving it.
pub struct Session {
    manager: MqttManager,
    event_loop: JoinHandle<()>,
}

impl Session {
    /// Spawn the manager over `transport`, connect, and subscribe to every
    /// configured filter.
    ///
    /// Returns as soon as the first connection attempt is under way;
    /// subscriptions made before the CONNACK are issued once it arrives.
    pub async fn start<T: Transport>(config: &AgentConfig, transport: T) -> anyhow::Result<Self> {
        let (manager, event_loop) = MqttManager::new(config.manager.clone(), transport)?;
        let event_loop = tokio::spawn(event_loop.run());

        let client_id = config.mqtt.client_id.clone();
        manager
            .connect(&config.mqtt, move |status, cause| match cause {
                Some(e) => tracing::warn!(client_id = %client_id, %status, error = %e, "session status"),
                None => tracing::info!(client_id = %client_id, %status, "session status"),
            })
            .await?;

        for subscription in &config.subscriptions {
            manager
                .subscribe(&subscription.filter, subscription.qos, |topic, payload| {
                    tracing::info!(topic = %topic, bytes = payload.len(), "message received");
                })
                .await?;
            tracing::debug!(filter = %subscription.filter, "subscription requested");
        }

        Ok(Self {
            manager,
            event_loop,
        })
    }

    pub fn manager(&self) -> &MqttManager {
        &self.manager
    }

    /// Disconnect and wait for the manager loop to exit.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let disconnected = self.manager.disconnect().await;
        drop(self.manager);
        self.event_loop.await?;
        disconnected?;
        Ok(())
    }
}
