//! iotmq agent: keeps an edge device connected to AWS IoT Core.
//!
//! Loads a TOML config, opens a managed MQTT session over mTLS, and
//! publishes periodic heartbeats until interrupted.

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use iotmq_agent::config::AgentConfig;
use iotmq_agent::heartbeat;
use iotmq_agent::session::Session;
use iotmq_mqtt_channel::RumqttTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "iotmq-agent starting");

    // ── Load config ─────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/iotmq/agent.toml".to_string());

    let config = AgentConfig::from_file(&config_path)?;
    tracing::info!(
        client_id = %config.mqtt.client_id,
        subscriptions = config.subscriptions.len(),
        "config loaded"
    );
    if !config.mqtt.use_tls {
        tracing::info!("MQTT plaintext mode (no TLS)");
    }

    // ── MQTT session ────────────────────────────────────────────
    let session = Session::start(&config, RumqttTransport::new()).await?;

    // ── Heartbeats until shutdown ───────────────────────────────
    let start_time = tokio::time::Instant::now();
    let heartbeat_topic = config.heartbeat_topic();

    tracing::info!("iotmq-agent ready");

    tokio::select! {
        () = heartbeat::run(
            session.manager(),
            &heartbeat_topic,
            &config.mqtt.client_id,
            Duration::from_secs(config.heartbeat_interval_secs),
            start_time,
        ) => {
            tracing::error!("heartbeat loop exited unexpectedly");
        }
        // Graceful shutdown on SIGINT
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    session.shutdown().await?;
    tracing::info!("iotmq-agent stopped");
    Ok(())
}
