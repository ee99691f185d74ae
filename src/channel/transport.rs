//! Transport abstraction for the channel client.
//!
//! The client never talks to a socket directly. It asks a [`Connector`] for a
//! new [`TransportHandle`] on every connect and learns what happens to that
//! handle through [`TransportEvent`]s posted into its event channel. This
//! keeps the state machine synchronous and lets tests script the transport.
//!
//! # Events
//!
//! A handle reports, in order: at most one [`TransportEvent::Opened`], any
//! number of [`TransportEvent::Message`]s, optionally a
//! [`TransportEvent::Failed`], then exactly one [`TransportEvent::Closed`].
//! A connection that drops without a close handshake closes with 1006, as a
//! browser would report it.
//!
//! # Production transport
//!
//! [`WsConnector`] spawns one tokio task per handle. The task owns the
//! WebSocket halves from [`crate::ws`], forwards frames as events, and
//! receives outgoing text and close requests over an unbounded channel.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::client::ClientEvent;
use super::ChannelError;
use crate::constants::CLOSE_ABNORMAL;
use crate::ws::{self, WsMessage};

/// How long to wait for the server to answer our close frame.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of a transport handle (mirrors the WebSocket `readyState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    /// Handshake in progress.
    Connecting = 0,
    /// Frames may be sent.
    Open = 1,
    /// Close requested, waiting for the close handshake.
    Closing = 2,
    /// Finished. The handle will never open again.
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Notification from a transport handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The handshake completed.
    Opened,
    /// A text frame arrived.
    Message(String),
    /// The connection closed.
    Closed {
        /// WebSocket close code (1000 = normal).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
    /// A transport or protocol error occurred. A `Closed` follows.
    Failed(String),
}

/// Destination for one handle's events.
///
/// Every event is tagged with the generation of the handle that produced it
/// so the client can discard events from handles it has already replaced.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl EventSink {
    /// Create a sink for the handle with the given generation.
    #[must_use]
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self { generation, tx }
    }

    /// Generation of the handle this sink belongs to.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Post an event. Returns `false` once the client is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(ClientEvent::Transport {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// One live connection attempt/session.
pub trait TransportHandle: Send + std::fmt::Debug {
    /// Current lifecycle state.
    fn ready_state(&self) -> ReadyState;

    /// Transmit a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::SendFailed`] if the handle is not open or the
    /// transport is gone.
    fn send_text(&mut self, text: String) -> Result<(), ChannelError>;

    /// Start the close handshake with `code` and `reason`. Idempotent.
    fn close(&mut self, code: u16, reason: &str);
}

/// Factory for transport handles.
pub trait Connector: Send + 'static {
    /// Begin connecting to `url`. The returned handle starts in
    /// [`ReadyState::Connecting`] and reports progress through `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ConnectionFailed`] if the handle cannot be
    /// constructed at all (for example, a malformed URL).
    fn open(&mut self, url: &str, sink: EventSink)
        -> Result<Box<dyn TransportHandle>, ChannelError>;
}

// =============================================================================
// WebSocket connector
// =============================================================================

/// Outgoing command from a [`WsHandle`] to its connection task.
#[derive(Debug)]
enum WsOutgoing {
    /// Send a UTF-8 text frame.
    Text(String),
    /// Initiate a close handshake.
    Close {
        /// Close code to send.
        code: u16,
        /// Close reason to send.
        reason: String,
    },
}

/// Production connector backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn open(
        &mut self,
        url: &str,
        sink: EventSink,
    ) -> Result<Box<dyn TransportHandle>, ChannelError> {
        ws::validate_url(url).map_err(|e| ChannelError::ConnectionFailed(format!("{e:#}")))?;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ChannelError::ConnectionFailed(format!("no tokio runtime: {e}")))?;

        let ready = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        runtime.spawn(run_connection(
            url.to_string(),
            Arc::clone(&ready),
            outgoing_rx,
            sink,
        ));

        Ok(Box::new(WsHandle { ready, outgoing_tx }))
    }
}

/// Handle to a connection task spawned by [`WsConnector`].
///
/// Dropping the handle ends the task after a best-effort close frame.
#[derive(Debug)]
struct WsHandle {
    ready: Arc<AtomicU8>,
    outgoing_tx: mpsc::UnboundedSender<WsOutgoing>,
}

impl TransportHandle for WsHandle {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.ready.load(Ordering::SeqCst))
    }

    fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        if self.ready_state() != ReadyState::Open {
            return Err(ChannelError::SendFailed("connection is not open".into()));
        }
        self.outgoing_tx
            .send(WsOutgoing::Text(text))
            .map_err(|_closed| ChannelError::SendFailed("connection task ended".into()))
    }

    fn close(&mut self, code: u16, reason: &str) {
        if matches!(self.ready_state(), ReadyState::Closing | ReadyState::Closed) {
            return;
        }
        self.ready.store(ReadyState::Closing as u8, Ordering::SeqCst);
        let _ = self.outgoing_tx.send(WsOutgoing::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

/// Mark the handle closed and report why.
fn finish(ready: &AtomicU8, sink: &EventSink, code: u16, reason: impl Into<String>) {
    ready.store(ReadyState::Closed as u8, Ordering::SeqCst);
    sink.emit(TransportEvent::Closed {
        code,
        reason: reason.into(),
    });
}

/// Run a single WebSocket connection.
///
/// Reads frames from the WebSocket and posts them as [`TransportEvent`]s.
/// Listens on `outgoing_rx` for text and close requests from the handle.
/// Exits when the connection closes or the handle is dropped.
async fn run_connection(
    url: String,
    ready: Arc<AtomicU8>,
    mut outgoing_rx: mpsc::UnboundedReceiver<WsOutgoing>,
    sink: EventSink,
) {
    log::debug!("[Channel] Connecting to {}", url);

    let connected = tokio::select! {
        result = ws::connect(&url) => result,
        request = outgoing_rx.recv() => {
            // Closed (or dropped) before the handshake finished.
            if let Some(WsOutgoing::Close { .. }) = request {
                finish(&ready, &sink, CLOSE_ABNORMAL, "closed before open");
            } else {
                ready.store(ReadyState::Closed as u8, Ordering::SeqCst);
            }
            return;
        }
    };

    let (mut writer, mut reader) = match connected {
        Ok(pair) => pair,
        Err(e) => {
            sink.emit(TransportEvent::Failed(format!("{e:#}")));
            finish(&ready, &sink, CLOSE_ABNORMAL, "");
            return;
        }
    };

    // A close requested during the handshake may already have moved us on.
    if ready
        .compare_exchange(
            ReadyState::Connecting as u8,
            ReadyState::Open as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        )
        .is_ok()
    {
        sink.emit(TransportEvent::Opened);
    }

    loop {
        tokio::select! {
            frame = reader.recv() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        sink.emit(TransportEvent::Message(text));
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        log::debug!("[Channel] Ignoring {}-byte binary frame", data.len());
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                        // Pings are auto-replied by tungstenite; ignore pongs
                    }
                    Some(Ok(WsMessage::Close { code, reason })) => {
                        finish(&ready, &sink, code, reason);
                        return;
                    }
                    Some(Err(e)) => {
                        sink.emit(TransportEvent::Failed(format!("{e:#}")));
                        finish(&ready, &sink, CLOSE_ABNORMAL, "");
                        return;
                    }
                    None => {
                        // Stream ended without a Close frame
                        finish(&ready, &sink, CLOSE_ABNORMAL, "stream ended");
                        return;
                    }
                }
            }

            request = outgoing_rx.recv() => {
                match request {
                    Some(WsOutgoing::Text(text)) => {
                        if let Err(e) = writer.send_text(&text).await {
                            sink.emit(TransportEvent::Failed(format!("{e:#}")));
                            finish(&ready, &sink, CLOSE_ABNORMAL, "");
                            return;
                        }
                    }
                    Some(WsOutgoing::Close { code, reason }) => {
                        if let Err(e) = writer.send_close(code, &reason).await {
                            log::debug!("[Channel] Close frame not sent: {e:#}");
                        }
                        await_close_echo(&mut reader).await;
                        finish(&ready, &sink, code, reason);
                        return;
                    }
                    None => {
                        // Handle dropped: nobody is listening any more.
                        let _ = writer.send_close(crate::constants::CLOSE_NORMAL, "").await;
                        ready.store(ReadyState::Closed as u8, Ordering::SeqCst);
                        return;
                    }
                }
            }
        }
    }
}

/// Drain frames until the peer answers our close frame or the stream ends.
async fn await_close_echo(reader: &mut ws::WsReader) {
    let drained = tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, async {
        while let Some(frame) = reader.recv().await {
            if matches!(frame, Ok(WsMessage::Close { .. }) | Err(_)) {
                break;
            }
        }
    })
    .await;

    if drained.is_err() {
        log::debug!("[Channel] Peer did not answer close within {:?}", CLOSE_HANDSHAKE_TIMEOUT);
    }
}
