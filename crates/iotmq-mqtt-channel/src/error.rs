//! MQTT manager error types.

use iotmq_protocol::ProtocolError;
use thiserror::Error;

/// Errors that can occur during MQTT manager operations.
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("subscribe error: {0}")]
    Subscribe(String),

    #[error("unsubscribe error: {0}")]
    Unsubscribe(String),

    #[error("disconnect error: {0}")]
    Disconnect(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("not connected and offline queueing is disabled")]
    NotConnected,

    #[error("MQTT manager loop has shut down")]
    Shutdown,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl MqttError {
    /// Argument and protocol errors are the caller's fault and never retried.
    pub fn is_argument_error(&self) -> bool {
        matches!(self, MqttError::InvalidArgument(_) | MqttError::Protocol(_))
    }
}

/// Convenience alias for MQTT results.
pub type MqttResult<T> = Result<T, MqttError>;
