//! MQTT transport: the broker-facing half of the connection manager.
//!
//! The manager never speaks MQTT itself. It drives a [`Transport`] that
//! opens clean sessions and reports what happened through an
//! [`EventSender`]. [`RumqttTransport`] is the production implementation
//! over `rumqttc::AsyncClient`; `MockTransport` stands in during tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use iotmq_protocol::Qos;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ConnectOptions;
use crate::error::{MqttError, MqttResult};
use crate::tls;

/// How long `close()` waits for the event loop to flush the DISCONNECT.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Request channel capacity of the rumqttc client.
const REQUEST_CAPACITY: usize = 64;

// ── Transport events ──────────────────────────────────────────

/// Something the transport observed on its connection.
#[derive(Debug)]
pub enum TransportEvent {
    /// The broker accepted the connection (CONNACK).
    Connected,
    /// The connection attempt failed before a CONNACK.
    ConnectFailed(MqttError),
    /// An established connection dropped without the user asking.
    ConnectionLost(MqttError),
    /// Inbound PUBLISH.
    Message { topic: String, payload: Vec<u8> },
}

/// Sending half handed to a transport for one connection attempt.
///
/// Every event is tagged with the epoch of the attempt that produced it so
/// the manager can discard stragglers from a connection it already closed.
#[derive(Debug, Clone)]
pub struct EventSender {
    epoch: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSender {
    pub(crate) fn new(epoch: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { epoch, tx }
    }

    /// Forward an event to the manager. Returns `false` once the manager is gone.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx.send((self.epoch, event)).is_ok()
    }
}

// ── Transport trait ───────────────────────────────────────────

/// Abstraction over the MQTT client library.
///
/// Enables driving the manager in tests without a real MQTT broker.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start a clean-session connection attempt.
    ///
    /// Must not wait for the broker: the outcome is reported later through
    /// `events`. An `Err` here means the attempt could not even start
    /// (e.g. unreadable TLS material).
    async fn open(&mut self, options: &ConnectOptions, events: EventSender) -> MqttResult<()>;

    /// Publish a raw payload to a topic.
    async fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> MqttResult<()>;

    /// Subscribe to a topic filter.
    async fn subscribe(&self, filter: &str, qos: Qos) -> MqttResult<()>;

    /// Remove a subscription.
    async fn unsubscribe(&self, filter: &str) -> MqttResult<()>;

    /// Close the current connection, waiting for it to shut down.
    async fn close(&mut self) -> MqttResult<()>;
}

// ── RumqttTransport ───────────────────────────────────────────

/// Transport over `rumqttc`.
///
/// Each `open()` builds a fresh `AsyncClient`/`EventLoop` pair and spawns a
/// task polling the event loop. The poller stops at the first connection
/// error instead of letting rumqttc reconnect on its own; reconnect policy
/// belongs to the manager.
#[derive(Default)]
pub struct RumqttTransport {
    client: Option<AsyncClient>,
    poller: Option<JoinHandle<()>>,
    /// Cleared by the poller once its event loop has stopped.
    live: Arc<AtomicBool>,
}

impl RumqttTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self) -> MqttResult<&AsyncClient> {
        self.client.as_ref().ok_or(MqttError::NotConnected)
    }

    /// Whether the event loop is still running and can take requests.
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
            && self.poller.as_ref().is_some_and(|poller| !poller.is_finished())
    }
}

fn to_rumqttc(qos: Qos) -> rumqttc::QoS {
    match qos {
        Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
        Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// Translate connect options into rumqttc options.
fn mqtt_options(options: &ConnectOptions) -> MqttResult<MqttOptions> {
    let mut mqtt = MqttOptions::new(
        &options.client_id,
        &options.endpoint.host,
        options.endpoint.port,
    );
    mqtt.set_keep_alive(options.keep_alive);
    // AWS IoT does not keep persistent sessions; every connect starts fresh.
    mqtt.set_clean_session(true);

    if let Some(will) = &options.last_will {
        mqtt.set_last_will(LastWill::new(
            &will.topic,
            will.payload.as_bytes().to_vec(),
            to_rumqttc(will.qos),
            false,
        ));
    }

    if let Some(files) = &options.tls {
        mqtt.set_transport(tls::load_tls_transport(files)?);
    }

    Ok(mqtt)
}

/// Poll the event loop until the connection ends, forwarding events.
async fn drive(mut eventloop: EventLoop, events: EventSender, live: Arc<AtomicBool>) {
    let mut connected = false;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                tracing::debug!(code = ?ack.code, "mqtt connack received");
                connected = true;
                events.send(TransportEvent::Connected);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                events.send(TransportEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                });
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!("mqtt disconnect flushed");
                live.store(false, Ordering::SeqCst);
                return;
            }
            Ok(_) => {} // SubAck, PubAck, PingResp, etc.
            Err(e) => {
                live.store(false, Ordering::SeqCst);
                let cause = connection_error(&e);
                if connected {
                    tracing::warn!(error = %e, "mqtt connection lost");
                    events.send(TransportEvent::ConnectionLost(cause));
                } else {
                    tracing::warn!(error = %e, "mqtt connect failed");
                    events.send(TransportEvent::ConnectFailed(cause));
                }
                return;
            }
        }
    }
}

fn connection_error(e: &ConnectionError) -> MqttError {
    match e {
        ConnectionError::Tls(tls) => MqttError::Certificate(tls.to_string()),
        other => MqttError::Connection(other.to_string()),
    }
}

#[async_trait]
impl Transport for RumqttTransport {
    async fn open(&mut self, options: &ConnectOptions, events: EventSender) -> MqttResult<()> {
        let mqtt = mqtt_options(options)?;

        // A previous poller may still be parked on a dead socket.
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }

        let (client, eventloop) = AsyncClient::new(mqtt, REQUEST_CAPACITY);
        tracing::info!(
            client_id = %options.client_id,
            endpoint = %options.endpoint,
            tls = options.tls.is_some(),
            "opening mqtt connection"
        );

        let live = Arc::new(AtomicBool::new(true));
        self.live = live.clone();
        self.poller = Some(tokio::spawn(drive(eventloop, events, live)));
        self.client = Some(client);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> MqttResult<()> {
        self.client()?
            .publish(topic, to_rumqttc(qos), false, payload)
            .await
            .map_err(|e| MqttError::Publish(e.to_string()))
    }

    async fn subscribe(&self, filter: &str, qos: Qos) -> MqttResult<()> {
        self.client()?
            .subscribe(filter, to_rumqttc(qos))
            .await
            .map_err(|e| MqttError::Subscribe(e.to_string()))
    }

    async fn unsubscribe(&self, filter: &str) -> MqttResult<()> {
        self.client()?
            .unsubscribe(filter)
            .await
            .map_err(|e| MqttError::Unsubscribe(e.to_string()))
    }

    async fn close(&mut self) -> MqttResult<()> {
        if !self.is_live() {
            // Nothing to say goodbye to: the event loop already stopped.
            self.client = None;
            self.poller = None;
            return Ok(());
        }
        let Some(client) = self.client.take() else {
            return Ok(());
        };
        let result = client
            .disconnect()
            .await
            .map_err(|e| MqttError::Disconnect(e.to_string()));

        if let Some(mut poller) = self.poller.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut poller).await.is_err() {
                tracing::warn!("mqtt event loop did not stop in time, aborting");
                poller.abort();
            }
        }
        result
    }
}
