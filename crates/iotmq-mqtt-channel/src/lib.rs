//! MQTT connection manager for AWS IoT Core.
//!
//! Keeps a device connected to the broker without the application having
//! to care about the network:
//! - `MqttManager` handle + `ManagerLoop` task owning the session state machine
//! - Exponential reconnect `Backoff` with a stability reset
//! - Bounded `OfflineQueue` drained on reconnect
//! - `SubscriptionRegistry` reissued on every clean session
//! - `Transport` trait with `RumqttTransport` (mTLS) for production and
//!   `MockTransport` for tests

pub mod backoff;
pub mod channel;
pub mod config;
pub mod error;
pub mod manager;
pub mod mock;
pub mod queue;
pub mod registry;
pub mod status;
pub mod tls;

// Re-exports for convenience.
pub use backoff::Backoff;
pub use channel::{EventSender, RumqttTransport, Transport, TransportEvent};
pub use config::{ConnectOptions, ManagerConfig, MqttConfig, QueueFullPolicy, TlsFiles};
pub use error::{MqttError, MqttResult};
pub use manager::{ManagerLoop, ManagerSnapshot, MqttManager};
pub use mock::{ConnectOutcome, MockTransport, PublishedMessage};
pub use queue::{Enqueued, OfflineQueue};
pub use registry::{MessageCallback, Subscription, SubscriptionRegistry};
pub use status::{ClientStatus, ConnectionState, StatusCallback, StatusNotifier};
