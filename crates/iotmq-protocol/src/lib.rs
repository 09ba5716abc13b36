//! Shared MQTT types for the iotmq connection manager.
//!
//! Pure, I/O-free building blocks used by `iotmq-mqtt-channel` and the agent:
//! - `topics`: wildcard matching and topic/filter validation
//! - `endpoint`: broker address derivation (AWS IoT style)
//! - `message`: `Qos`, `LastWill`, `QueuedMessage`

pub mod endpoint;
pub mod error;
pub mod message;
pub mod topics;

pub use endpoint::Endpoint;
pub use error::{ProtocolError, ProtocolResult};
pub use message::{LastWill, Qos, QueuedMessage};
