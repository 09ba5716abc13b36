//! Shared test harness for E2E integration tests.
//!
//! Runs a real `MqttManager` loop over a shared `MockTransport`, so every
//! scenario exercises the same code path a device would, minus the broker.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use iotmq_mqtt_channel::{
    ClientStatus, ConnectionState, ManagerConfig, MockTransport, MqttConfig, MqttError,
    MqttManager,
};
use tokio::task::JoinHandle;

/// One status callback invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub status: ClientStatus,
    pub cause: Option<String>,
}

/// Records every status callback in order.
#[derive(Debug, Clone, Default)]
pub struct StatusLog {
    events: Arc<Mutex<Vec<StatusEvent>>>,
}

impl StatusLog {
    pub fn callback(&self) -> impl Fn(ClientStatus, Option<&MqttError>) + Send + Sync + 'static {
        let events = self.events.clone();
        move |status, cause| {
            events.lock().unwrap().push(StatusEvent {
                status,
                cause: cause.map(|e| e.to_string()),
            });
        }
    }

    pub fn statuses(&self) -> Vec<ClientStatus> {
        self.events.lock().unwrap().iter().map(|e| e.status).collect()
    }

    pub fn last(&self) -> Option<StatusEvent> {
        self.events.lock().unwrap().last().cloned()
    }
}

/// Inbound messages collected by a subscription callback.
#[derive(Debug, Clone, Default)]
pub struct Inbox {
    messages: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl Inbox {
    pub fn callback(&self) -> impl Fn(&str, &[u8]) + Send + Sync + 'static {
        let messages = self.messages.clone();
        move |topic, payload| {
            messages
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_vec()));
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.clone())
            .collect()
    }
}

/// Manager + mock transport + status recorder.
pub struct TestHarness {
    pub manager: MqttManager,
    /// Shared with the manager loop; scripts the broker side.
    pub mock: MockTransport,
    pub status: StatusLog,
    pub event_loop: JoinHandle<()>,
}

impl TestHarness {
    pub fn new(config: ManagerConfig) -> Self {
        let mock = MockTransport::new();
        let (manager, event_loop) = MqttManager::new(config, mock.clone()).unwrap();
        Self {
            manager,
            mock,
            status: StatusLog::default(),
            event_loop: tokio::spawn(event_loop.run()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ManagerConfig::default())
    }

    pub fn mqtt_config() -> MqttConfig {
        MqttConfig::plaintext("rpi-001", "localhost", 1883)
    }

    /// Connect and wait for the CONNACK to be processed.
    pub async fn connect(&self) {
        self.manager
            .connect(&Self::mqtt_config(), self.status.callback())
            .await
            .unwrap();
        self.wait_for(ConnectionState::Connected).await;
    }

    pub async fn wait_for(&self, state: ConnectionState) {
        self.manager
            .state_changes()
            .wait_for(|s| *s == state)
            .await
            .unwrap();
    }

    /// Drop the live connection and wait until the manager notices.
    pub async fn drop_connection(&self, cause: &str) {
        assert!(self.mock.drop_connection(cause), "no live connection to drop");
        self.wait_for(ConnectionState::Reconnecting).await;
    }

    pub async fn queued_topics(&self) -> Vec<String> {
        self.manager
            .snapshot()
            .await
            .unwrap()
            .queued
            .into_iter()
            .map(|m| m.topic)
            .collect()
    }

    pub fn published_topics(&self) -> Vec<String> {
        self.mock.published().into_iter().map(|m| m.topic).collect()
    }
}
