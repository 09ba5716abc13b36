//! Connection state and the user-facing status callback.

use std::fmt;
use std::sync::Arc;

use crate::error::MqttError;

/// Internal connection state, owned by the manager loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Status reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Connecting,
    Connected,
    Reconnecting,
    /// Connection ended without the user asking (failure or gave up).
    ConnectionLost,
    /// Connection ended by `disconnect()`.
    Disconnected,
}

impl ClientStatus {
    pub fn from_state(state: ConnectionState, user_disconnect: bool) -> Self {
        match state {
            ConnectionState::Connecting => ClientStatus::Connecting,
            ConnectionState::Connected => ClientStatus::Connected,
            ConnectionState::Reconnecting => ClientStatus::Reconnecting,
            ConnectionState::Disconnected if user_disconnect => ClientStatus::Disconnected,
            ConnectionState::Disconnected => ClientStatus::ConnectionLost,
        }
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientStatus::Connecting => "connecting",
            ClientStatus::Connected => "connected",
            ClientStatus::Reconnecting => "reconnecting",
            ClientStatus::ConnectionLost => "connection_lost",
            ClientStatus::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Callback invoked on every status change, with the cause of failures.
pub type StatusCallback = Arc<dyn Fn(ClientStatus, Option<&MqttError>) + Send + Sync>;

/// Delivers status changes to the user's callback, if one is set.
///
/// Runs synchronously on the manager loop; callbacks must not block.
#[derive(Default)]
pub struct StatusNotifier {
    callback: Option<StatusCallback>,
}

impl StatusNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_callback(&mut self, callback: Option<StatusCallback>) {
        self.callback = callback;
    }

    pub fn notify(&self, state: ConnectionState, user_disconnect: bool, cause: Option<&MqttError>) {
        let status = ClientStatus::from_state(state, user_disconnect);
        match cause {
            Some(e) => tracing::warn!(status = %status, error = %e, "mqtt status changed"),
            None => tracing::info!(status = %status, "mqtt status changed"),
        }
        if let Some(callback) = &self.callback {
            callback(status, cause);
        }
    }
}

impl fmt::Debug for StatusNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusNotifier")
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn state_mapping() {
        use ConnectionState::*;
        assert_eq!(ClientStatus::from_state(Connected, false), ClientStatus::Connected);
        assert_eq!(ClientStatus::from_state(Connecting, false), ClientStatus::Connecting);
        assert_eq!(
            ClientStatus::from_state(Reconnecting, false),
            ClientStatus::Reconnecting
        );
        assert_eq!(
            ClientStatus::from_state(Disconnected, false),
            ClientStatus::ConnectionLost
        );
        assert_eq!(
            ClientStatus::from_state(Disconnected, true),
            ClientStatus::Disconnected
        );
    }

    #[test]
    fn notify_passes_cause() {
        let seen: Arc<Mutex<Vec<(ClientStatus, Option<String>)>>> = Arc::default();
        let sink = seen.clone();
        let mut notifier = StatusNotifier::new();
        notifier.set_callback(Some(Arc::new(move |status, cause| {
            sink.lock()
                .unwrap()
                .push((status, cause.map(|e| e.to_string())));
        })));

        notifier.notify(ConnectionState::Connecting, false, None);
        let err = MqttError::Connection("host unreachable".into());
        notifier.notify(ConnectionState::Disconnected, false, Some(&err));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (ClientStatus::Connecting, None));
        assert_eq!(seen[1].0, ClientStatus::ConnectionLost);
        assert!(seen[1].1.as_deref().unwrap().contains("host unreachable"));
    }

    #[test]
    fn notify_without_callback_is_harmless() {
        StatusNotifier::new().notify(ConnectionState::Connected, false, None);
    }
}
