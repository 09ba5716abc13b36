//! Protocol-level validation errors.

use thiserror::Error;

/// Errors raised while validating topics, QoS levels and endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: &'static str },

    #[error("invalid QoS level {0} (expected 0, 1 or 2)")]
    InvalidQos(u8),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Convenience alias for protocol results.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
