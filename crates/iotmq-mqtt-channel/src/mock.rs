//! Mock MQTT transport for testing without a real broker.
//!
//! Records every call the manager makes and lets tests script connect
//! outcomes, failing operations, connection drops and inbound messages.
//! Clones share state, so a test keeps one handle while the manager owns
//! another.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use iotmq_protocol::Qos;
use tokio::time::Instant;

use crate::channel::{EventSender, Transport, TransportEvent};
use crate::config::ConnectOptions;
use crate::error::{MqttError, MqttResult};

/// A recorded publish call.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub at: Instant,
}

/// Scripted result of one `open()` call.
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    /// Broker accepts the connection.
    Accept,
    /// Attempt fails asynchronously with a connection error.
    Refuse(String),
    /// `open()` itself fails with a certificate error.
    BadCertificate(String),
    /// Nothing is reported; the attempt hangs.
    Hang,
}

#[derive(Default)]
struct State {
    opens: Vec<Instant>,
    closes: usize,
    outcomes: VecDeque<ConnectOutcome>,
    events: Option<EventSender>,
    last_options: Option<ConnectOptions>,
    published: Vec<PublishedMessage>,
    subscribe_attempts: Vec<(String, Qos)>,
    unsubscribe_attempts: Vec<String>,
    failing_filters: HashSet<String>,
    failing_topics: HashSet<String>,
    fail_close: bool,
}

/// Mock implementation of the `Transport` trait.
///
/// Thread-safe via `Mutex` (fine for test contexts).
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for upcoming `open()` calls. Unscripted opens accept.
    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = ConnectOutcome>) {
        self.state.lock().unwrap().outcomes.extend(outcomes);
    }

    /// Make every subscribe to `filter` fail.
    pub fn fail_subscribe(&self, filter: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_filters
            .insert(filter.to_string());
    }

    /// Make every publish to `topic` fail.
    pub fn fail_publish(&self, topic: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_topics
            .insert(topic.to_string());
    }

    /// Make `close()` report an error.
    pub fn fail_close(&self) {
        self.state.lock().unwrap().fail_close = true;
    }

    /// Simulate the broker dropping the current connection.
    pub fn drop_connection(&self, cause: &str) -> bool {
        self.emit(TransportEvent::ConnectionLost(MqttError::Connection(
            cause.to_string(),
        )))
    }

    /// Simulate an inbound PUBLISH on the current connection.
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> bool {
        self.emit(TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        })
    }

    /// Complete a `Hang` attempt with a CONNACK.
    pub fn accept_pending(&self) -> bool {
        self.emit(TransportEvent::Connected)
    }

    fn emit(&self, event: TransportEvent) -> bool {
        let events = self.state.lock().unwrap().events.clone();
        events.is_some_and(|tx| tx.send(event))
    }

    /// Instants at which `open()` was called.
    pub fn opens(&self) -> Vec<Instant> {
        self.state.lock().unwrap().opens.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().opens.len()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    /// Options passed to the most recent `open()`.
    pub fn last_options(&self) -> Option<ConnectOptions> {
        self.state.lock().unwrap().last_options.clone()
    }

    /// Get all successfully published messages.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().unwrap().published.clone()
    }

    /// Get published messages for a specific topic.
    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Every subscribe call, including failed ones.
    pub fn subscribe_attempts(&self) -> Vec<(String, Qos)> {
        self.state.lock().unwrap().subscribe_attempts.clone()
    }

    /// Number of subscribe calls made for `filter`.
    pub fn subscribe_count(&self, filter: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .subscribe_attempts
            .iter()
            .filter(|(f, _)| f == filter)
            .count()
    }

    pub fn unsubscribe_attempts(&self) -> Vec<String> {
        self.state.lock().unwrap().unsubscribe_attempts.clone()
    }

    /// Clear recorded calls (scripted behaviour is kept).
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.published.clear();
        state.subscribe_attempts.clear();
        state.unsubscribe_attempts.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self, options: &ConnectOptions, events: EventSender) -> MqttResult<()> {
        let mut state = self.state.lock().unwrap();
        state.opens.push(Instant::now());
        state.last_options = Some(options.clone());

        match state.outcomes.pop_front().unwrap_or(ConnectOutcome::Accept) {
            ConnectOutcome::Accept => {
                events.send(TransportEvent::Connected);
            }
            ConnectOutcome::Refuse(cause) => {
                events.send(TransportEvent::ConnectFailed(MqttError::Connection(cause)));
            }
            ConnectOutcome::BadCertificate(cause) => {
                return Err(MqttError::Certificate(cause));
            }
            ConnectOutcome::Hang => {}
        }
        state.events = Some(events);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> MqttResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_topics.contains(topic) {
            return Err(MqttError::Publish(format!("scripted failure on '{topic}'")));
        }
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            at: Instant::now(),
        });
        Ok(())
    }

    async fn subscribe(&self, filter: &str, qos: Qos) -> MqttResult<()> {
        let mut state = self.state.lock().unwrap();
        state.subscribe_attempts.push((filter.to_string(), qos));
        if state.failing_filters.contains(filter) {
            return Err(MqttError::Subscribe(format!(
                "scripted failure on '{filter}'"
            )));
        }
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> MqttResult<()> {
        self.state
            .lock()
            .unwrap()
            .unsubscribe_attempts
            .push(filter.to_string());
        Ok(())
    }

    async fn close(&mut self) -> MqttResult<()> {
        let mut state = self.state.lock().unwrap();
        state.closes += 1;
        state.events = None;
        if state.fail_close {
            return Err(MqttError::Disconnect("scripted close failure".into()));
        }
        Ok(())
    }
}
