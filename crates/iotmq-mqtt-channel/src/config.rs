use std::time::Duration;

use iotmq_protocol::{Endpoint, LastWill, topics};
use serde::Deserialize;

use crate::error::{MqttError, MqttResult};

/// MQTT connection configuration, loadable from TOML or environment.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// MQTT client ID (should be unique per device).
    #[serde(default)]
    pub client_id: String,
    /// Account-specific endpoint prefix (e.g., "a1b2c3d4e5-ats").
    #[serde(default)]
    pub endpoint_prefix: Option<String>,
    /// AWS region name (e.g., "us-east-1").
    #[serde(default)]
    pub region: Option<String>,
    /// Region domain suffix. Derived from the region when absent.
    #[serde(default)]
    pub region_domain: Option<String>,
    /// Explicit broker hostname; bypasses endpoint derivation (local dev).
    #[serde(default)]
    pub broker_host: Option<String>,
    /// MQTT broker port (default 8883 for TLS).
    #[serde(default = "default_port")]
    pub broker_port: u16,
    /// Enable TLS (mTLS). When false, connects plaintext (local dev).
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
    /// Path to device X.509 certificate (PEM).
    #[serde(default)]
    pub client_cert_path: String,
    /// Path to device private key (PEM).
    #[serde(default)]
    pub client_key_path: String,
    /// Path to CA certificate (e.g., AmazonRootCA1.pem).
    #[serde(default)]
    pub ca_cert_path: String,
    /// Keep-alive interval in seconds.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u16,
    /// Message the broker publishes if this client drops off uncleanly.
    #[serde(default)]
    pub last_will: Option<LastWill>,
}

fn default_use_tls() -> bool {
    true
}

fn default_port() -> u16 {
    iotmq_protocol::endpoint::SECURE_MQTT_PORT
}

fn default_keepalive() -> u16 {
    10
}

/// PEM files for mutual TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub ca_cert_path: String,
    pub client_cert_path: String,
    pub client_key_path: String,
}

/// Everything a transport needs to open a clean session.
///
/// Built from [`MqttConfig::connect_options`]; immutable once connect begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub client_id: String,
    pub endpoint: Endpoint,
    pub keep_alive: Duration,
    pub tls: Option<TlsFiles>,
    pub last_will: Option<LastWill>,
}

impl MqttConfig {
    /// Create a config for a derived AWS IoT endpoint with default settings.
    pub fn aws_iot(
        client_id: impl Into<String>,
        endpoint_prefix: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            endpoint_prefix: Some(endpoint_prefix.into()),
            region: Some(region.into()),
            region_domain: None,
            broker_host: None,
            broker_port: default_port(),
            use_tls: default_use_tls(),
            client_cert_path: String::new(),
            client_key_path: String::new(),
            ca_cert_path: String::new(),
            keepalive_secs: default_keepalive(),
            last_will: None,
        }
    }

    /// Create a plaintext config for a local broker.
    pub fn plaintext(client_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            broker_host: Some(host.into()),
            broker_port: port,
            use_tls: false,
            endpoint_prefix: None,
            region: None,
            ..Self::aws_iot(client_id, "", "")
        }
    }

    /// Resolve the broker endpoint.
    pub fn endpoint(&self) -> MqttResult<Endpoint> {
        if let Some(host) = self.broker_host.as_deref().filter(|h| !h.is_empty()) {
            return Ok(Endpoint::new(host, self.broker_port));
        }
        match (self.endpoint_prefix.as_deref(), self.region.as_deref()) {
            (Some(prefix), Some(region)) => {
                Ok(Endpoint::aws_iot(prefix, region, self.region_domain.as_deref())?)
            }
            _ => Err(MqttError::InvalidArgument(
                "either broker_host or endpoint_prefix + region is required".into(),
            )),
        }
    }

    /// Validate the config and build the options used to open a connection.
    pub fn connect_options(&self) -> MqttResult<ConnectOptions> {
        if self.client_id.is_empty() {
            return Err(MqttError::InvalidArgument("client_id is empty".into()));
        }
        let endpoint = self.endpoint()?;

        let tls = if self.use_tls {
            let missing = [
                ("ca_cert_path", &self.ca_cert_path),
                ("client_cert_path", &self.client_cert_path),
                ("client_key_path", &self.client_key_path),
            ]
            .into_iter()
            .find(|(_, path)| path.is_empty());
            if let Some((name, _)) = missing {
                return Err(MqttError::InvalidArgument(format!(
                    "{name} is required when use_tls is enabled"
                )));
            }
            Some(TlsFiles {
                ca_cert_path: self.ca_cert_path.clone(),
                client_cert_path: self.client_cert_path.clone(),
                client_key_path: self.client_key_path.clone(),
            })
        } else {
            None
        };

        if let Some(will) = &self.last_will {
            topics::validate_topic(&will.topic)?;
        }

        Ok(ConnectOptions {
            client_id: self.client_id.clone(),
            endpoint,
            keep_alive: Duration::from_secs(self.keepalive_secs.into()),
            tls,
            last_will: self.last_will.clone(),
        })
    }
}

// ── Manager behaviour ─────────────────────────────────────────

/// What to do when the offline queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueFullPolicy {
    /// Drop the incoming message.
    KeepOldest,
    /// Evict the oldest queued message to make room.
    #[default]
    KeepNewest,
}

/// Reconnect and offline-queue behaviour of the manager.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
    #[serde(default = "default_min_reconnect_delay")]
    pub min_reconnect_delay_secs: u64,
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_secs: u64,
    /// Reconnect attempts before giving up; `-1` retries forever.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: i32,
    #[serde(default = "default_offline_queue_enabled")]
    pub offline_queue_enabled: bool,
    #[serde(default = "default_offline_queue_bound")]
    pub offline_queue_bound: usize,
    #[serde(default)]
    pub queue_full_policy: QueueFullPolicy,
    /// Pause between publishes when draining the offline queue.
    #[serde(default = "default_draining_interval")]
    pub draining_interval_ms: u64,
    /// A connection that lived this long resets the reconnect backoff when lost.
    #[serde(default = "default_connection_stability")]
    pub connection_stability_secs: u64,
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_min_reconnect_delay() -> u64 {
    4
}

fn default_max_reconnect_delay() -> u64 {
    64
}

fn default_max_reconnect_attempts() -> i32 {
    10
}

fn default_offline_queue_enabled() -> bool {
    true
}

fn default_offline_queue_bound() -> usize {
    100
}

fn default_draining_interval() -> u64 {
    250
}

fn default_connection_stability() -> u64 {
    10
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: default_auto_reconnect(),
            min_reconnect_delay_secs: default_min_reconnect_delay(),
            max_reconnect_delay_secs: default_max_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            offline_queue_enabled: default_offline_queue_enabled(),
            offline_queue_bound: default_offline_queue_bound(),
            queue_full_policy: QueueFullPolicy::default(),
            draining_interval_ms: default_draining_interval(),
            connection_stability_secs: default_connection_stability(),
        }
    }
}

impl ManagerConfig {
    /// Reject settings the manager cannot honour.
    pub fn validate(&self) -> MqttResult<()> {
        if self.min_reconnect_delay_secs > self.max_reconnect_delay_secs {
            return Err(MqttError::InvalidArgument(format!(
                "min_reconnect_delay_secs ({}) exceeds max_reconnect_delay_secs ({})",
                self.min_reconnect_delay_secs, self.max_reconnect_delay_secs
            )));
        }
        if self.max_reconnect_attempts <= 0 && self.max_reconnect_attempts != -1 {
            return Err(MqttError::InvalidArgument(format!(
                "max_reconnect_attempts must be positive or -1, got {}",
                self.max_reconnect_attempts
            )));
        }
        if self.offline_queue_bound == 0 {
            return Err(MqttError::InvalidArgument(
                "offline_queue_bound must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Attempt limit, `None` when unlimited.
    pub fn reconnect_attempt_limit(&self) -> Option<u32> {
        u32::try_from(self.max_reconnect_attempts).ok()
    }

    pub fn min_reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.min_reconnect_delay_secs)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_delay_secs)
    }

    pub fn draining_interval(&self) -> Duration {
        Duration::from_millis(self.draining_interval_ms)
    }

    pub fn connection_stability(&self) -> Duration {
        Duration::from_secs(self.connection_stability_secs)
    }
}
