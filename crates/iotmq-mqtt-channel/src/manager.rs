//! MQTT connection manager: the session state machine for AWS IoT Core.
//!
//! [`MqttManager`] is a cheap, cloneable handle. All state lives in the
//! [`ManagerLoop`] returned alongside it, which the caller must drive in a
//! spawned task:
//! ```ignore
//! let (manager, event_loop) = MqttManager::new(ManagerConfig::default(), RumqttTransport::new())?;
//! tokio::spawn(event_loop.run());
//! manager.connect(&mqtt_config, |status, cause| tracing::info!(%status, ?cause)).await?;
//! ```
//! User calls, transport events and timers are all handled one at a time on
//! that task, so no two mutations ever interleave.

use std::sync::Arc;
use std::time::Duration;

use iotmq_protocol::{Qos, QueuedMessage, topics};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::backoff::Backoff;
use crate::channel::{EventSender, Transport, TransportEvent};
use crate::config::{ConnectOptions, ManagerConfig, MqttConfig};
use crate::error::{MqttError, MqttResult};
use crate::queue::{Enqueued, OfflineQueue};
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::status::{ClientStatus, ConnectionState, StatusCallback, StatusNotifier};

/// Pending user commands before callers start waiting.
const COMMAND_CAPACITY: usize = 64;

// ── Commands ──────────────────────────────────────────────────

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Connect {
        options: ConnectOptions,
        on_status: StatusCallback,
        reply: Reply<MqttResult<()>>,
    },
    Disconnect {
        reply: Reply<MqttResult<()>>,
    },
    Publish {
        message: QueuedMessage,
        reply: Reply<MqttResult<()>>,
    },
    Subscribe {
        subscription: Subscription,
        reply: Reply<MqttResult<()>>,
    },
    Unsubscribe {
        filter: String,
        reply: Reply<MqttResult<()>>,
    },
    ResetReconnect {
        reply: Reply<()>,
    },
    Snapshot {
        reply: Reply<ManagerSnapshot>,
    },
}

/// Point-in-time view of the manager's internals.
#[derive(Debug, Clone)]
pub struct ManagerSnapshot {
    pub state: ConnectionState,
    /// Offline queue contents, oldest first.
    pub queued: Vec<QueuedMessage>,
    /// Registered topic filters, sorted.
    pub subscriptions: Vec<String>,
    pub reconnect_attempts: u32,
    pub next_reconnect_delay: Duration,
}

// ── MqttManager ───────────────────────────────────────────────

/// Handle to a managed MQTT connection.
///
/// Every method hands off to the manager loop and waits for its answer;
/// none of them wait for network round-trips except `disconnect()`.
#[derive(Debug, Clone)]
pub struct MqttManager {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl MqttManager {
    /// Create a manager over `transport`.
    ///
    /// Returns `(manager, event_loop)`. The caller must spawn
    /// `event_loop.run()`; it exits once every handle has been dropped.
    pub fn new<T: Transport>(
        config: ManagerConfig,
        transport: T,
    ) -> MqttResult<(Self, ManagerLoop<T>)> {
        config.validate()?;
        let backoff = Backoff::from_config(&config)?;
        let queue = OfflineQueue::new(config.offline_queue_bound, config.queue_full_policy)?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let event_loop = ManagerLoop {
            config,
            transport,
            commands: command_rx,
            events_tx,
            events: events_rx,
            state_tx,
            state: ConnectionState::Disconnected,
            notifier: StatusNotifier::new(),
            registry: SubscriptionRegistry::new(),
            queue,
            backoff,
            options: None,
            epoch: 0,
            user_disconnect: false,
            connected_at: None,
            reconnect_at: None,
            drain_at: None,
        };

        Ok((
            Self {
                commands: command_tx,
                state: state_rx,
            },
            event_loop,
        ))
    }

    /// Open a clean session.
    ///
    /// Returns once the attempt has started; progress is reported through
    /// `on_status`. Calling this while a session is already active only
    /// swaps the callback and re-reports the current status.
    pub async fn connect<F>(&self, config: &MqttConfig, on_status: F) -> MqttResult<()>
    where
        F: Fn(ClientStatus, Option<&MqttError>) + Send + Sync + 'static,
    {
        let options = config.connect_options()?;
        let on_status: StatusCallback = Arc::new(on_status);
        self.request(|reply| Command::Connect {
            options,
            on_status,
            reply,
        })
        .await?
    }

    /// Close the connection. Always leaves the manager Disconnected.
    ///
    /// A failure while closing the transport is returned after the
    /// transition has happened.
    pub async fn disconnect(&self) -> MqttResult<()> {
        self.request(|reply| Command::Disconnect { reply }).await?
    }

    /// Publish a payload, or queue it while the connection is down.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        qos: Qos,
    ) -> MqttResult<()> {
        topics::validate_topic(topic)?;
        let message = QueuedMessage::new(topic, payload, qos);
        self.request(|reply| Command::Publish { message, reply })
            .await?
    }

    /// Subscribe to `filter`, invoking `on_message` for every matching message.
    ///
    /// The subscription survives reconnects until `unsubscribe` or the next
    /// `connect`.
    pub async fn subscribe<F>(&self, filter: &str, qos: Qos, on_message: F) -> MqttResult<()>
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        topics::validate_filter(filter)?;
        let subscription = Subscription {
            filter: filter.to_string(),
            qos,
            on_message: Arc::new(on_message),
        };
        self.request(|reply| Command::Subscribe {
            subscription,
            reply,
        })
        .await?
    }

    pub async fn unsubscribe(&self, filter: &str) -> MqttResult<()> {
        topics::validate_filter(filter)?;
        let filter = filter.to_string();
        self.request(|reply| Command::Unsubscribe { filter, reply })
            .await?
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Restart the reconnect backoff from the minimum delay with a fresh
    /// attempt budget. A reconnect already scheduled keeps its deadline.
    pub async fn reset_reconnect(&self) -> MqttResult<()> {
        self.request(|reply| Command::ResetReconnect { reply }).await
    }

    pub async fn snapshot(&self) -> MqttResult<ManagerSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    async fn request<R>(&self, command: impl FnOnce(Reply<R>) -> Command) -> MqttResult<R> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| MqttError::Shutdown)?;
        response.await.map_err(|_| MqttError::Shutdown)
    }
}

// ── ManagerLoop ───────────────────────────────────────────────

/// What woke the loop up.
enum Wake {
    Command(Command),
    Transport(u64, TransportEvent),
    Reconnect,
    Drain,
}

/// Owner of the connection: state, transport, backoff, queue and registry.
pub struct ManagerLoop<T: Transport> {
    config: ManagerConfig,
    transport: T,
    commands: mpsc::Receiver<Command>,
    events_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    events: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    state_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,
    notifier: StatusNotifier,
    registry: SubscriptionRegistry,
    queue: OfflineQueue,
    backoff: Backoff,
    options: Option<ConnectOptions>,
    /// Bumped on every open/close; events from older epochs are dropped.
    epoch: u64,
    user_disconnect: bool,
    connected_at: Option<Instant>,
    reconnect_at: Option<Instant>,
    drain_at: Option<Instant>,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl<T: Transport> ManagerLoop<T> {
    /// Drive the manager until every `MqttManager` handle is dropped.
    pub async fn run(mut self) {
        tracing::debug!("mqtt manager loop started");

        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => Wake::Command(command),
                    None => break,
                },
                Some((epoch, event)) = self.events.recv() => Wake::Transport(epoch, event),
                () = sleep_until(self.reconnect_at) => Wake::Reconnect,
                () = sleep_until(self.drain_at) => Wake::Drain,
            };

            match wake {
                Wake::Command(command) => self.handle_command(command).await,
                Wake::Transport(epoch, event) => self.handle_event(epoch, event).await,
                Wake::Reconnect => {
                    self.reconnect_at = None;
                    self.reconnect().await;
                }
                Wake::Drain => {
                    self.drain_at = None;
                    self.drain_queue().await;
                }
            }
        }

        if self.state != ConnectionState::Disconnected {
            if let Err(e) = self.transport.close().await {
                tracing::warn!(error = %e, "failed to close transport on shutdown");
            }
        }
        tracing::debug!("mqtt manager loop stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                options,
                on_status,
                reply,
            } => {
                let _ = reply.send(self.connect(options, on_status).await);
            }
            Command::Disconnect { reply } => {
                let _ = reply.send(self.disconnect().await);
            }
            Command::Publish { message, reply } => {
                let _ = reply.send(self.publish(message).await);
            }
            Command::Subscribe {
                subscription,
                reply,
            } => {
                let _ = reply.send(self.subscribe(subscription).await);
            }
            Command::Unsubscribe { filter, reply } => {
                let _ = reply.send(self.unsubscribe(&filter).await);
            }
            Command::ResetReconnect { reply } => {
                tracing::info!(
                    attempts = self.backoff.attempts(),
                    "reconnect backoff reset"
                );
                self.backoff.reset();
                let _ = reply.send(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(ManagerSnapshot {
                    state: self.state,
                    queued: self.queue.iter().cloned().collect(),
                    subscriptions: self.registry.filters(),
                    reconnect_attempts: self.backoff.attempts(),
                    next_reconnect_delay: self.backoff.current_delay(),
                });
            }
        }
    }

    async fn handle_event(&mut self, epoch: u64, event: TransportEvent) {
        if epoch != self.epoch {
            tracing::debug!(epoch, current = self.epoch, "dropping event from a closed connection");
            return;
        }
        match event {
            TransportEvent::Connected => self.on_connected().await,
            TransportEvent::ConnectFailed(cause) => self.on_connect_failed(cause),
            TransportEvent::ConnectionLost(cause) => self.on_connection_lost(cause),
            TransportEvent::Message { topic, payload } => {
                let delivered = self.registry.dispatch(&topic, &payload);
                if delivered == 0 {
                    tracing::debug!(topic = %topic, "no subscription matched inbound message");
                }
            }
        }
    }

    // ── State transitions ─────────────────────────────────────

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn notify(&self, cause: Option<&MqttError>) {
        self.notifier.notify(self.state, self.user_disconnect, cause);
    }

    fn transition(&mut self, state: ConnectionState, cause: Option<&MqttError>) {
        self.set_state(state);
        self.notify(cause);
    }

    async fn connect(
        &mut self,
        options: ConnectOptions,
        on_status: StatusCallback,
    ) -> MqttResult<()> {
        self.notifier.set_callback(Some(on_status));

        if self.state != ConnectionState::Disconnected {
            tracing::debug!(state = ?self.state, "connect ignored, session already active");
            self.notify(None);
            return Ok(());
        }

        self.registry.clear();
        self.queue.clear();
        self.backoff.reset();
        self.user_disconnect = false;
        self.connected_at = None;
        self.reconnect_at = None;
        self.drain_at = None;
        self.options = Some(options);

        self.transition(ConnectionState::Connecting, None);
        if let Err(e) = self.open_transport().await {
            self.transition(ConnectionState::Disconnected, Some(&e));
            return Err(e);
        }
        Ok(())
    }

    async fn open_transport(&mut self) -> MqttResult<()> {
        let Some(options) = self.options.as_ref() else {
            return Err(MqttError::InvalidArgument(
                "connect options missing; call connect() first".into(),
            ));
        };
        self.epoch += 1;
        let events = EventSender::new(self.epoch, self.events_tx.clone());
        self.transport.open(options, events).await
    }

    async fn on_connected(&mut self) {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        ) {
            tracing::debug!(state = ?self.state, "ignoring connack in unexpected state");
            return;
        }

        self.set_state(ConnectionState::Connected);
        self.connected_at = Some(Instant::now());

        // Clean session: the broker remembers nothing from last time.
        self.registry.resubscribe_all(&self.transport).await;
        if !self.queue.is_empty() {
            tracing::info!(queued = self.queue.len(), "draining offline queue");
            self.drain_queue().await;
        }
        self.notify(None);
    }

    fn on_connect_failed(&mut self, cause: MqttError) {
        match self.state {
            ConnectionState::Connecting => {
                if self.user_disconnect || !self.config.auto_reconnect {
                    self.transition(ConnectionState::Disconnected, Some(&cause));
                } else {
                    self.schedule_reconnect(cause);
                }
            }
            ConnectionState::Reconnecting => self.schedule_reconnect(cause),
            state => {
                tracing::debug!(?state, error = %cause, "ignoring connect failure in unexpected state");
            }
        }
    }

    fn on_connection_lost(&mut self, cause: MqttError) {
        if self.user_disconnect {
            return;
        }
        self.drain_at = None;

        if !self.config.auto_reconnect {
            self.transition(ConnectionState::Disconnected, Some(&cause));
            return;
        }

        // A connection that held up for a while resets the backoff; a flaky
        // one keeps growing it.
        let stable = self
            .connected_at
            .is_some_and(|at| at.elapsed() >= self.config.connection_stability());
        if stable {
            self.backoff.reset();
        }
        tracing::warn!(error = %cause, stable, "mqtt connection lost");
        self.schedule_reconnect(cause);
    }

    fn schedule_reconnect(&mut self, cause: MqttError) {
        match self.backoff.schedule_next() {
            Some(delay) => {
                self.reconnect_at = Some(Instant::now() + delay);
                tracing::info!(
                    delay_secs = delay.as_secs(),
                    attempts = self.backoff.attempts(),
                    "reconnect scheduled"
                );
                self.transition(ConnectionState::Reconnecting, Some(&cause));
            }
            None => {
                tracing::error!(
                    attempts = self.backoff.attempts(),
                    "reconnect attempts exhausted, giving up"
                );
                self.transition(ConnectionState::Disconnected, Some(&cause));
            }
        }
    }

    async fn reconnect(&mut self) {
        // The user may have disconnected while we were waiting.
        if self.state != ConnectionState::Reconnecting {
            tracing::debug!(state = ?self.state, "stale reconnect timer ignored");
            return;
        }
        if self.backoff.is_exhausted() {
            tracing::debug!("reconnect timer fired after attempts were exhausted");
            return;
        }

        self.backoff.record_attempt();
        tracing::info!(attempt = self.backoff.attempts(), "attempting reconnect");
        if let Err(e) = self.open_transport().await {
            self.schedule_reconnect(e);
        }
    }

    async fn disconnect(&mut self) -> MqttResult<()> {
        self.user_disconnect = true;
        self.drain_at = None;

        let closed = self.transport.close().await;
        self.epoch += 1;
        self.connected_at = None;
        self.transition(ConnectionState::Disconnected, None);

        if let Err(e) = &closed {
            tracing::warn!(error = %e, "transport close failed");
        }
        closed
    }

    // ── Publishing ────────────────────────────────────────────

    async fn publish(&mut self, message: QueuedMessage) -> MqttResult<()> {
        if self.state == ConnectionState::Connected {
            if self.queue.is_empty() {
                return self
                    .transport
                    .publish(&message.topic, &message.payload, message.qos)
                    .await;
            }
            // Stay behind messages that are still draining.
            self.enqueue(message);
            if self.drain_at.is_none() {
                self.drain_at = Some(Instant::now() + self.config.draining_interval());
            }
            return Ok(());
        }

        if !self.config.offline_queue_enabled {
            return Err(MqttError::NotConnected);
        }
        self.enqueue(message);
        Ok(())
    }

    fn enqueue(&mut self, message: QueuedMessage) {
        let topic = message.topic.clone();
        match self.queue.enqueue(message) {
            Enqueued::Appended => {
                tracing::debug!(topic = %topic, queued = self.queue.len(), "message queued");
            }
            Enqueued::EvictedOldest => {
                tracing::warn!(topic = %topic, bound = self.queue.bound(), "offline queue full, evicted oldest message");
            }
            Enqueued::Dropped => {
                tracing::warn!(topic = %topic, bound = self.queue.bound(), "offline queue full, dropped new message");
            }
        }
    }

    /// Publish the head of the queue and schedule the next one.
    async fn drain_queue(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }
        let Some(message) = self.queue.pop_front() else {
            return;
        };

        match self
            .transport
            .publish(&message.topic, &message.payload, message.qos)
            .await
        {
            Ok(()) => {
                tracing::debug!(
                    topic = %message.topic,
                    remaining = self.queue.len(),
                    "published queued message"
                );
                if !self.queue.is_empty() {
                    self.drain_at = Some(Instant::now() + self.config.draining_interval());
                }
            }
            Err(e) => {
                // Not requeued: a message the transport keeps rejecting would
                // otherwise block the queue forever.
                tracing::error!(
                    topic = %message.topic,
                    error = %e,
                    remaining = self.queue.len(),
                    "failed to publish queued message, dropping it and pausing drain"
                );
            }
        }
    }

    // ── Subscriptions ─────────────────────────────────────────

    async fn subscribe(&mut self, subscription: Subscription) -> MqttResult<()> {
        match self.state {
            ConnectionState::Connected => {
                self.transport
                    .subscribe(&subscription.filter, subscription.qos)
                    .await?;
                tracing::info!(filter = %subscription.filter, qos = %subscription.qos, "subscribed");
                self.registry.insert(subscription);
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                tracing::debug!(filter = %subscription.filter, "subscription deferred until connected");
                self.registry.insert(subscription);
            }
            ConnectionState::Disconnected => {
                tracing::debug!(filter = %subscription.filter, "subscribe ignored, no session");
            }
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, filter: &str) -> MqttResult<()> {
        match self.state {
            ConnectionState::Connected => {
                self.transport.unsubscribe(filter).await?;
                self.registry.remove(filter);
                tracing::info!(filter = %filter, "unsubscribed");
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                self.registry.remove(filter);
            }
            ConnectionState::Disconnected => {
                tracing::debug!(filter = %filter, "unsubscribe ignored, no session");
            }
        }
        Ok(())
    }
}
