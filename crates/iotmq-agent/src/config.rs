//! Agent configuration, loadable from TOML.

use iotmq_mqtt_channel::{ManagerConfig, MqttConfig};
use iotmq_protocol::Qos;
use serde::Deserialize;

/// Top-level configuration for the agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Broker connection settings.
    pub mqtt: MqttConfig,
    /// Reconnect and offline-queue behaviour. Optional; defaults apply.
    #[serde(default)]
    pub manager: ManagerConfig,
    /// Heartbeat interval in seconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Heartbeat topic. Defaults to `devices/{client_id}/heartbeat`.
    #[serde(default)]
    pub heartbeat_topic: Option<String>,
    /// Topic filters to subscribe to; inbound messages are logged.
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    pub filter: String,
    #[serde(default = "default_subscription_qos")]
    pub qos: Qos,
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_subscription_qos() -> Qos {
    Qos::AtLeastOnce
}

impl AgentConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let mut config: Self = toml::from_str(contents)?;
        config.ensure_client_id();
        Ok(config)
    }

    /// Generate a client ID when none was configured.
    pub fn ensure_client_id(&mut self) {
        if self.mqtt.client_id.is_empty() {
            self.mqtt.client_id = format!("iotmq-{}", uuid::Uuid::now_v7());
            tracing::info!(client_id = %self.mqtt.client_id, "generated mqtt client id");
        }
    }

    pub fn heartbeat_topic(&self) -> String {
        self.heartbeat_topic
            .clone()
            .unwrap_or_else(|| format!("devices/{}/heartbeat", self.mqtt.client_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotmq_mqtt_channel::QueueFullPolicy;

    #[test]
    fn deserialize_minimal_config() {
        let toml = r#"
[mqtt]
client_id = "rpi-001"
endpoint_prefix = "a1b2c3-ats"
region = "us-east-1"
client_cert_path = "/etc/iotmq/cert.pem"
client_key_path = "/etc/iotmq/key.pem"
ca_cert_path = "/etc/iotmq/AmazonRootCA1.pem"
"#;
        let config = AgentConfig::from_toml(toml).unwrap();
        assert_eq!(config.mqtt.client_id, "rpi-001");
        assert_eq!(config.mqtt.broker_port, 8883); // default
        assert_eq!(config.heartbeat_interval_secs, 30); // default
        assert_eq!(config.heartbeat_topic(), "devices/rpi-001/heartbeat");
        assert_eq!(config.manager.min_reconnect_delay_secs, 4);
        assert!(config.subscriptions.is_empty());
    }

    #[test]
    fn deserialize_full_config() {
        let toml = r#"
heartbeat_interval_secs = 15
heartbeat_topic = "fleet/alpha/heartbeat"

[mqtt]
client_id = "sbc-042"
broker_host = "localhost"
broker_port = 1883
use_tls = false
keepalive_secs = 60

[manager]
max_reconnect_attempts = -1
offline_queue_bound = 500
queue_full_policy = "keep_oldest"

[[subscriptions]]
filter = "devices/sbc-042/commands/#"

[[subscriptions]]
filter = "fleet/+/config"
qos = 0
"#;
        let config = AgentConfig::from_toml(toml).unwrap();
        assert_eq!(config.heartbeat_interval_secs, 15);
        assert_eq!(config.heartbeat_topic(), "fleet/alpha/heartbeat");
        assert!(!config.mqtt.use_tls);
        assert_eq!(config.mqtt.keepalive_secs, 60);
        assert_eq!(config.manager.reconnect_attempt_limit(), None);
        assert_eq!(config.manager.queue_full_policy, QueueFullPolicy::KeepOldest);
        assert_eq!(config.subscriptions.len(), 2);
        assert_eq!(config.subscriptions[0].qos, Qos::AtLeastOnce);
        assert_eq!(config.subscriptions[1].qos, Qos::AtMostOnce);
    }

    #[test]
    fn missing_client_id_is_generated() {
        let toml = r#"
[mqtt]
broker_host = "localhost"
use_tls = false
"#;
        let config = AgentConfig::from_toml(toml).unwrap();
        assert!(config.mqtt.client_id.starts_with("iotmq-"));
        assert!(config.mqtt.connect_options().is_ok());
    }

    #[test]
    fn invalid_qos_rejected() {
        let toml = r#"
[mqtt]
client_id = "rpi-001"

[[subscriptions]]
filter = "a/b"
qos = 3
"#;
        assert!(AgentConfig::from_toml(toml).is_err());
    }
}
