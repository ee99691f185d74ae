//! Channel client state machine.
//!
//! [`ChannelClient`] owns at most one transport handle, the heartbeat timer
//! and the reconnect timer. It is synchronous: every operation and every
//! [`ClientEvent`] is applied in full before the next one, and the only
//! asynchronous work (the handshake, timer sleeps) happens in spawned tasks
//! that report back through the event channel.
//!
//! ```text
//!              connect()                 Opened
//! disconnected ─────────► connecting ──────────────► connected
//!      ▲  ▲                   │  │                      │
//!      │  │   Closed(1000)    │  │ Failed               │ Failed
//!      │  └───────────────────┘  ▼                      ▼
//!      │  ◄──── Closed ─────── error ◄──────────────────┘
//!      │   Closed(≠1000): schedule retry while attempts < max
//!      └────────────────────────────────────────────────────
//! ```
//!
//! Every `Failed` is followed by a `Closed`, which leaves `error` for
//! `disconnected` with the same retry rule as any other close.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

use super::backoff::{ReconnectPolicy, ReconnectState};
use super::message::{ChannelMessage, MessageKind, OutboundMessage};
use super::timer::TimerHandle;
use super::transport::{Connector, EventSink, ReadyState, TransportEvent, TransportHandle};
use super::{ChannelSnapshot, ConnectionStatus, Visibility};
use crate::constants::{CLOSE_NORMAL, HEARTBEAT_INTERVAL, MESSAGE_BUFFER, USER_DISCONNECT_REASON};

/// Reason used when a stale handle is replaced by a new connect.
const SUPERSEDED_REASON: &str = "Superseded by new connection";

/// Settings for one [`ChannelClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Full WebSocket URL of the endpoint.
    pub url: String,
    /// Time between heartbeat pings while connected.
    pub heartbeat_interval: Duration,
    /// Reconnect backoff.
    pub policy: ReconnectPolicy,
    /// Feed handle construction failures into the backoff scheduler.
    pub retry_on_connect_failure: bool,
    /// Event kinds to subscribe to after each open. Empty sends nothing.
    pub subscriptions: Vec<String>,
}

impl ClientConfig {
    /// Default settings for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            policy: ReconnectPolicy::default(),
            retry_on_connect_failure: false,
            subscriptions: Vec::new(),
        }
    }
}

/// Everything the client reacts to besides direct calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Something happened to the handle with this generation.
    Transport {
        /// Handle generation the event belongs to.
        generation: u64,
        /// What happened.
        event: TransportEvent,
    },
    /// Heartbeat timer for the handle with this generation fired.
    HeartbeatTick {
        /// Handle generation the heartbeat was started for.
        generation: u64,
    },
    /// Reconnect timer fired.
    ReconnectDue {
        /// Sequence number of the scheduled retry.
        seq: u64,
    },
}

/// Resilient channel client.
pub struct ChannelClient<C: Connector> {
    config: ClientConfig,
    connector: C,
    events_tx: UnboundedSender<ClientEvent>,

    status: ConnectionStatus,
    handle: Option<Box<dyn TransportHandle>>,
    generation: u64,

    reconnect: ReconnectState,
    reconnect_seq: u64,
    reconnect_timer: Option<TimerHandle>,
    heartbeat: Option<TimerHandle>,

    last_message: Option<ChannelMessage>,
    messages_tx: broadcast::Sender<ChannelMessage>,
    connection_count: u64,
}

impl<C: Connector> std::fmt::Debug for ChannelClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelClient")
            .field("url", &self.config.url)
            .field("status", &self.status)
            .field("generation", &self.generation)
            .field("reconnect", &self.reconnect)
            .field("connection_count", &self.connection_count)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ChannelClient<C> {
    /// Create a disconnected client.
    ///
    /// Transport and timer events are posted to `events_tx`; the owner must
    /// feed them back through [`ChannelClient::handle_event`].
    pub fn new(config: ClientConfig, connector: C, events_tx: UnboundedSender<ClientEvent>) -> Self {
        Self {
            config,
            connector,
            events_tx,
            status: ConnectionStatus::Disconnected,
            handle: None,
            generation: 0,
            reconnect: ReconnectState::default(),
            reconnect_seq: 0,
            reconnect_timer: None,
            heartbeat: None,
            last_message: None,
            messages_tx: broadcast::channel(MESSAGE_BUFFER).0,
            connection_count: 0,
        }
    }

    // === Accessors ===

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Most recent parsed inbound message.
    pub fn last_message(&self) -> Option<&ChannelMessage> {
        self.last_message.as_ref()
    }

    /// Receiver for every parsed inbound message, in arrival order.
    ///
    /// Unlike the snapshot, repeated or back-to-back messages each arrive.
    pub fn messages(&self) -> broadcast::Receiver<ChannelMessage> {
        self.messages_tx.subscribe()
    }

    /// Sender side of [`ChannelClient::messages`], for handing out receivers
    /// without access to the client.
    pub fn message_sender(&self) -> broadcast::Sender<ChannelMessage> {
        self.messages_tx.clone()
    }

    /// Successful opens so far.
    pub fn connection_count(&self) -> u64 {
        self.connection_count
    }

    /// Retry bookkeeping.
    pub fn reconnect_state(&self) -> ReconnectState {
        self.reconnect
    }

    /// Whether a reconnect timer is pending.
    pub fn has_pending_reconnect(&self) -> bool {
        self.reconnect_timer.is_some()
    }

    /// Whether the heartbeat timer is running.
    pub fn heartbeat_active(&self) -> bool {
        self.heartbeat.is_some()
    }

    /// Ready state of the current handle, if there is one.
    pub fn ready_state(&self) -> Option<ReadyState> {
        self.handle.as_ref().map(|h| h.ready_state())
    }

    /// Settings this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Read-only view for collaborators.
    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            status: self.status,
            last_message: self.last_message.clone(),
            connection_count: self.connection_count,
            reconnect_attempts: self.reconnect.attempts,
        }
    }

    // === Operations ===

    /// Open a new connection unless the current one is already open.
    ///
    /// Cancels any pending retry. A handle still connecting or closing is
    /// closed with 1000 and replaced.
    pub fn connect(&mut self) {
        if self.ready_state() == Some(ReadyState::Open) {
            log::debug!("[Channel] Already connected, ignoring connect()");
            return;
        }

        self.cancel_reconnect();
        self.stop_heartbeat();
        if let Some(mut stale) = self.handle.take() {
            log::debug!("[Channel] Replacing {:?} handle", stale.ready_state());
            stale.close(CLOSE_NORMAL, SUPERSEDED_REASON);
        }

        self.set_status(ConnectionStatus::Connecting);
        self.generation += 1;
        let sink = EventSink::new(self.generation, self.events_tx.clone());

        match self.connector.open(&self.config.url, sink) {
            Ok(handle) => {
                log::info!("[Channel] Connecting to {}", self.config.url);
                self.handle = Some(handle);
            }
            Err(e) => {
                log::error!("[Channel] Failed to create connection: {e}");
                self.set_status(ConnectionStatus::Error);
                if self.config.retry_on_connect_failure {
                    self.schedule_reconnect();
                }
            }
        }
    }

    /// Close the connection on purpose. Safe in any state.
    pub fn disconnect(&mut self) {
        self.cancel_reconnect();
        self.stop_heartbeat();
        if let Some(mut handle) = self.handle.take() {
            log::info!("[Channel] Disconnecting");
            handle.close(CLOSE_NORMAL, USER_DISCONNECT_REASON);
        }
        self.set_status(ConnectionStatus::Disconnected);
    }

    /// Serialize `payload` and transmit it if the client is connected.
    ///
    /// Both the status and the handle must agree: a handle can report open
    /// before `Opened` is applied, or after `Failed` moved us to `error`.
    /// Returns whether the frame was handed to the transport. Anything else
    /// is logged and dropped; nothing is queued.
    pub fn send<T: Serialize + ?Sized>(&mut self, payload: &T) -> bool {
        let connected = self.status == ConnectionStatus::Connected;
        let Some(handle) = self
            .handle
            .as_mut()
            .filter(|h| connected && h.ready_state() == ReadyState::Open)
        else {
            log::warn!("[Channel] Not connected, dropping outgoing message");
            return false;
        };

        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                log::error!("[Channel] Failed to serialize outgoing message: {e}");
                return false;
            }
        };

        match handle.send_text(text) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[Channel] {e}");
                false
            }
        }
    }

    /// React to the hosting page becoming visible or hidden.
    pub fn on_visibility(&mut self, visibility: Visibility) {
        if visibility == Visibility::Visible && self.status == ConnectionStatus::Disconnected {
            log::info!("[Channel] Page visible while disconnected, reconnecting");
            self.connect();
        }
    }

    /// Apply one event from a transport or timer task.
    pub fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Transport { generation, event } => {
                if generation != self.generation || self.handle.is_none() {
                    log::trace!("[Channel] Ignoring stale event from generation {generation}");
                    return;
                }
                match event {
                    TransportEvent::Opened => self.on_open(),
                    TransportEvent::Message(text) => self.on_message(&text),
                    TransportEvent::Closed { code, reason } => self.on_close(code, &reason),
                    TransportEvent::Failed(error) => self.on_error(&error),
                }
            }
            ClientEvent::HeartbeatTick { generation } => {
                if generation == self.generation && self.heartbeat.is_some() {
                    log::trace!("[Channel] Heartbeat");
                    self.send(&OutboundMessage::ping());
                }
            }
            ClientEvent::ReconnectDue { seq } => {
                if seq != self.reconnect_seq || self.reconnect_timer.take().is_none() {
                    return;
                }
                self.reconnect.clear_schedule();
                log::info!(
                    "[Channel] Reconnect attempt {}/{}",
                    self.reconnect.attempts,
                    self.config.policy.max_attempts
                );
                self.connect();
            }
        }
    }

    // === Transport callbacks ===

    fn on_open(&mut self) {
        log::info!("[Channel] Connected");
        self.set_status(ConnectionStatus::Connected);
        self.reconnect.reset();
        self.connection_count += 1;

        self.heartbeat = Some(TimerHandle::every(
            self.config.heartbeat_interval,
            self.events_tx.clone(),
            ClientEvent::HeartbeatTick {
                generation: self.generation,
            },
        ));

        if !self.config.subscriptions.is_empty() {
            let request = OutboundMessage::subscribe(self.config.subscriptions.clone());
            self.send(&request);
        }
    }

    fn on_message(&mut self, text: &str) {
        match ChannelMessage::parse(text) {
            Ok(message) => {
                if message.kind == MessageKind::ConnectionEstablished {
                    log::info!(
                        "[Channel] Connection established: {}",
                        message.connection_id.as_deref().unwrap_or("<unknown>")
                    );
                } else {
                    log::debug!("[Channel] Received {}", message.kind);
                }
                // No receivers is fine: the snapshot still records it
                let _ = self.messages_tx.send(message.clone());
                self.last_message = Some(message);
            }
            Err(e) => {
                log::warn!("[Channel] Dropping malformed message: {e}");
            }
        }
    }

    fn on_close(&mut self, code: u16, reason: &str) {
        log::info!("[Channel] Closed: code={code} reason={reason:?}");
        self.stop_heartbeat();
        self.handle = None;
        self.set_status(ConnectionStatus::Disconnected);

        if code != CLOSE_NORMAL {
            self.schedule_reconnect();
        }
    }

    fn on_error(&mut self, error: &str) {
        log::error!("[Channel] Transport error: {error}");
        self.stop_heartbeat();
        self.set_status(ConnectionStatus::Error);
    }

    // === Helpers ===

    fn schedule_reconnect(&mut self) {
        let Some(delay) = self.reconnect.schedule(&self.config.policy, Instant::now()) else {
            log::warn!(
                "[Channel] Giving up after {} reconnect attempts",
                self.reconnect.attempts
            );
            return;
        };

        self.reconnect_seq += 1;
        self.reconnect_timer = Some(TimerHandle::after(
            delay,
            self.events_tx.clone(),
            ClientEvent::ReconnectDue {
                seq: self.reconnect_seq,
            },
        ));
        log::info!(
            "[Channel] Reconnecting in {:.1}s (attempt {}/{})",
            delay.as_secs_f64(),
            self.reconnect.attempts,
            self.config.policy.max_attempts
        );
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.cancel();
        }
        self.reconnect.clear_schedule();
    }

    fn stop_heartbeat(&mut self) {
        if let Some(timer) = self.heartbeat.take() {
            timer.cancel();
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            log::debug!("[Channel] {} -> {}", self.status, status);
            self.status = status;
        }
    }
}

impl<C: Connector> Drop for ChannelClient<C> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelError;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    #[derive(Debug, Default)]
    struct Link {
        state: Option<ReadyState>,
        sent: Vec<String>,
        closed_with: Option<(u16, String)>,
    }

    #[derive(Debug)]
    struct FakeHandle(Arc<Mutex<Link>>);

    impl TransportHandle for FakeHandle {
        fn ready_state(&self) -> ReadyState {
            self.0.lock().unwrap().state.unwrap_or(ReadyState::Connecting)
        }

        fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
            self.0.lock().unwrap().sent.push(text);
            Ok(())
        }

        fn close(&mut self, code: u16, reason: &str) {
            let mut link = self.0.lock().unwrap();
            link.state = Some(ReadyState::Closing);
            link.closed_with = Some((code, reason.to_string()));
        }
    }

    #[derive(Clone, Default)]
    struct FakeConnector {
        links: Arc<Mutex<Vec<(EventSink, Arc<Mutex<Link>>)>>>,
        refuse: bool,
    }

    impl Connector for FakeConnector {
        fn open(
            &mut self,
            _url: &str,
            sink: EventSink,
        ) -> Result<Box<dyn TransportHandle>, ChannelError> {
            if self.refuse {
                return Err(ChannelError::ConnectionFailed("invalid url".into()));
            }
            let link = Arc::new(Mutex::new(Link::default()));
            self.links.lock().unwrap().push((sink, Arc::clone(&link)));
            Ok(Box::new(FakeHandle(link)))
        }
    }

    impl FakeConnector {
        fn count(&self) -> usize {
            self.links.lock().unwrap().len()
        }

        fn link(&self, index: usize) -> Arc<Mutex<Link>> {
            Arc::clone(&self.links.lock().unwrap()[index].1)
        }

        fn open_latest(&self) -> ClientEvent {
            let links = self.links.lock().unwrap();
            let (sink, link) = links.last().unwrap();
            link.lock().unwrap().state = Some(ReadyState::Open);
            ClientEvent::Transport {
                generation: sink.generation(),
                event: TransportEvent::Opened,
            }
        }

        fn close_latest(&self, code: u16) -> ClientEvent {
            let links = self.links.lock().unwrap();
            let (sink, link) = links.last().unwrap();
            link.lock().unwrap().state = Some(ReadyState::Closed);
            ClientEvent::Transport {
                generation: sink.generation(),
                event: TransportEvent::Closed {
                    code,
                    reason: String::new(),
                },
            }
        }
    }

    fn client(
        connector: FakeConnector,
    ) -> (ChannelClient<FakeConnector>, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = ChannelClient::new(ClientConfig::new("ws://test/ws/live-updates"), connector, tx);
        (client, rx)
    }

    #[tokio::test]
    async fn test_connect_moves_to_connecting_then_connected() {
        let connector = FakeConnector::default();
        let (mut client, _rx) = client(connector.clone());

        client.connect();
        assert_eq!(client.status(), ConnectionStatus::Connecting);
        assert_eq!(connector.count(), 1);

        client.handle_event(connector.open_latest());
        assert_eq!(client.status(), ConnectionStatus::Connected);
        assert_eq!(client.connection_count(), 1);
        assert!(client.heartbeat_active());
    }

    #[tokio::test]
    async fn test_connect_while_open_is_noop() {
        let connector = FakeConnector::default();
        let (mut client, _rx) = client(connector.clone());
        client.connect();
        client.handle_event(connector.open_latest());

        client.connect();
        assert_eq!(connector.count(), 1);
        assert_eq!(client.status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_connect_while_connecting_replaces_handle() {
        let connector = FakeConnector::default();
        let (mut client, _rx) = client(connector.clone());
        client.connect();
        client.connect();

        assert_eq!(connector.count(), 2);
        let first = connector.link(0);
        assert_eq!(
            first.lock().unwrap().closed_with,
            Some((CLOSE_NORMAL, SUPERSEDED_REASON.to_string()))
        );
    }

    #[tokio::test]
    async fn test_events_from_superseded_handle_are_ignored() {
        let connector = FakeConnector::default();
        let (mut client, _rx) = client(connector.clone());
        client.connect();
        let stale_open = connector.open_latest();
        client.connect();

        client.handle_event(stale_open);
        assert_eq!(client.status(), ConnectionStatus::Connecting);
        assert_eq!(client.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_clean_close_does_not_schedule_reconnect() {
        let connector = FakeConnector::default();
        let (mut client, _rx) = client(connector.clone());
        client.connect();
        client.handle_event(connector.open_latest());

        client.handle_event(connector.close_latest(CLOSE_NORMAL));
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert!(!client.has_pending_reconnect());
        assert!(!client.heartbeat_active());
    }

    #[tokio::test]
    async fn test_abnormal_close_schedules_reconnect() {
        let connector = FakeConnector::default();
        let (mut client, _rx) = client(connector.clone());
        client.connect();
        client.handle_event(connector.open_latest());

        client.handle_event(connector.close_latest(1006));
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert!(client.has_pending_reconnect());
        assert_eq!(client.reconnect_state().attempts, 1);
        assert!(client.reconnect_state().scheduled_at.is_some());
    }

    #[tokio::test]
    async fn test_disconnect_clears_timers_and_closes_with_1000() {
        let connector = FakeConnector::default();
        let (mut client, _rx) = client(connector.clone());
        client.connect();
        client.handle_event(connector.open_latest());
        client.disconnect();

        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert!(!client.heartbeat_active());
        assert!(!client.has_pending_reconnect());
        assert_eq!(
            connector.link(0).lock().unwrap().closed_with,
            Some((CLOSE_NORMAL, USER_DISCONNECT_REASON.to_string()))
        );
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_reconnect() {
        let connector = FakeConnector::default();
        let (mut client, _rx) = client(connector.clone());
        client.connect();
        client.handle_event(connector.close_latest(1011));
        assert!(client.has_pending_reconnect());

        client.disconnect();
        assert!(!client.has_pending_reconnect());
        assert_eq!(client.reconnect_state().scheduled_at, None);
    }

    #[tokio::test]
    async fn test_send_while_not_open_never_reaches_transport() {
        let connector = FakeConnector::default();
        let (mut client, _rx) = client(connector.clone());

        assert!(!client.send(&serde_json::json!({"type": "ack"})));

        client.connect();
        assert!(!client.send(&serde_json::json!({"type": "ack"})));
        assert!(connector.link(0).lock().unwrap().sent.is_empty());
    }

    #[tokio::test]
    async fn test_send_requires_connected_status_not_just_open_handle() {
        let connector = FakeConnector::default();
        let (mut client, _rx) = client(connector.clone());
        client.connect();

        // Handle reports open but Opened has not been applied yet
        connector.link(0).lock().unwrap().state = Some(ReadyState::Open);
        assert_eq!(client.status(), ConnectionStatus::Connecting);
        assert!(!client.send(&serde_json::json!({"type": "ack"})));
        assert!(connector.link(0).lock().unwrap().sent.is_empty());

        // Failed arrives while the handle still reports open
        client.handle_event(connector.open_latest());
        let generation = connector.links.lock().unwrap()[0].0.generation();
        client.handle_event(ClientEvent::Transport {
            generation,
            event: TransportEvent::Failed("reset by peer".into()),
        });
        assert_eq!(client.status(), ConnectionStatus::Error);
        assert_eq!(client.ready_state(), Some(ReadyState::Open));
        assert!(!client.send(&serde_json::json!({"type": "ack"})));
        assert!(connector.link(0).lock().unwrap().sent.is_empty());
    }

    #[tokio::test]
    async fn test_send_while_open_transmits_json() {
        let connector = FakeConnector::default();
        let (mut client, _rx) = client(connector.clone());
        client.connect();
        client.handle_event(connector.open_latest());

        assert!(client.send(&serde_json::json!({"type": "ack", "id": 3})));
        let sent = connector.link(0).lock().unwrap().sent.clone();
        assert_eq!(sent, vec![r#"{"id":3,"type":"ack"}"#.to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_message_changes_nothing() {
        let connector = FakeConnector::default();
        let (mut client, _rx) = client(connector.clone());
        client.connect();
        client.handle_event(connector.open_latest());
        let generation = connector.links.lock().unwrap()[0].0.generation();

        client.handle_event(ClientEvent::Transport {
            generation,
            event: TransportEvent::Message("{not json".into()),
        });
        assert!(client.last_message().is_none());
        assert_eq!(client.status(), ConnectionStatus::Connected);

        client.handle_event(ClientEvent::Transport {
            generation,
            event: TransportEvent::Message(
                r#"{"type":"system_status","data":{"ok":true},"timestamp":"2024-05-01T10:00:00"}"#
                    .into(),
            ),
        });
        assert_eq!(client.last_message().unwrap().kind, MessageKind::SystemStatus);
    }

    #[tokio::test]
    async fn test_every_message_is_broadcast() {
        let connector = FakeConnector::default();
        let (mut client, _rx) = client(connector.clone());
        let mut messages = client.messages();
        client.connect();
        client.handle_event(connector.open_latest());
        let generation = connector.links.lock().unwrap()[0].0.generation();

        let pong = r#"{"type":"pong","timestamp":"2024-05-01T10:00:00"}"#;
        for text in [pong, "garbage", pong] {
            client.handle_event(ClientEvent::Transport {
                generation,
                event: TransportEvent::Message(text.into()),
            });
        }

        assert_eq!(messages.try_recv().unwrap().kind, MessageKind::Pong);
        assert_eq!(messages.try_recv().unwrap().kind, MessageKind::Pong);
        assert!(messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_error_sets_status_without_scheduling() {
        let connector = FakeConnector::default();
        let (mut client, _rx) = client(connector.clone());
        client.connect();
        client.handle_event(connector.open_latest());
        let generation = connector.links.lock().unwrap()[0].0.generation();

        client.handle_event(ClientEvent::Transport {
            generation,
            event: TransportEvent::Failed("reset by peer".into()),
        });
        assert_eq!(client.status(), ConnectionStatus::Error);
        assert!(!client.heartbeat_active());
        assert!(!client.has_pending_reconnect());
    }

    #[tokio::test]
    async fn test_construction_failure_sets_error_without_retry() {
        let connector = FakeConnector {
            refuse: true,
            ..FakeConnector::default()
        };
        let (mut client, _rx) = client(connector);
        client.connect();

        assert_eq!(client.status(), ConnectionStatus::Error);
        assert!(!client.has_pending_reconnect());
    }

    #[tokio::test]
    async fn test_construction_failure_can_feed_backoff() {
        let connector = FakeConnector {
            refuse: true,
            ..FakeConnector::default()
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut config = ClientConfig::new("ws://test");
        config.retry_on_connect_failure = true;
        let mut client = ChannelClient::new(config, connector, tx);
        client.connect();

        assert_eq!(client.status(), ConnectionStatus::Error);
        assert!(client.has_pending_reconnect());
    }

    #[tokio::test]
    async fn test_visibility_reconnects_only_when_disconnected() {
        let connector = FakeConnector::default();
        let (mut client, _rx) = client(connector.clone());

        client.on_visibility(Visibility::Hidden);
        assert_eq!(connector.count(), 0);

        client.on_visibility(Visibility::Visible);
        assert_eq!(connector.count(), 1);

        // Connecting: visible again does nothing
        client.on_visibility(Visibility::Visible);
        assert_eq!(connector.count(), 1);
    }

    #[tokio::test]
    async fn test_stale_reconnect_due_is_ignored() {
        let connector = FakeConnector::default();
        let (mut client, _rx) = client(connector.clone());
        client.connect();
        client.handle_event(connector.close_latest(1006));
        client.connect();
        assert_eq!(connector.count(), 2);

        client.handle_event(ClientEvent::ReconnectDue { seq: 1 });
        assert_eq!(connector.count(), 2);
    }

    #[tokio::test]
    async fn test_subscriptions_sent_after_open() {
        let connector = FakeConnector::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut config = ClientConfig::new("ws://test");
        config.subscriptions = vec!["call_event".into()];
        let mut client = ChannelClient::new(config, connector.clone(), tx);
        client.connect();
        client.handle_event(connector.open_latest());

        let sent = connector.link(0).lock().unwrap().sent.clone();
        assert_eq!(sent.len(), 1);
        let json: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(json["type"], "subscribe");
        assert_eq!(json["events"], serde_json::json!(["call_event"]));
    }
}
