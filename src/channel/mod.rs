//! Resilient live-updates channel.
//!
//! This module provides the client side of the dashboard's real-time
//! channel: one WebSocket connection, a status state machine, a heartbeat
//! and an exponential-backoff reconnection scheduler.
//!
//! # Architecture
//!
//! ```text
//! ChannelServiceHandle (cloneable, collaborators)
//!     │  connect / disconnect / send / set_visibility
//!     ▼
//! ChannelService event loop ◄──── ClientEvent ────┐
//!     │                                           │
//!     └── ChannelClient (state machine)           │
//!           ├── TransportHandle (one live) ── transport task
//!           ├── heartbeat TimerHandle ─────── timer task
//!           └── reconnect TimerHandle ─────── timer task
//! ```
//!
//! Transport and timer tasks never touch client state. They post
//! [`client::ClientEvent`]s into one channel and the service loop dispatches
//! them synchronously, so exactly one task mutates the client.
//!
//! # Usage
//!
//! ```ignore
//! let service = ChannelService::spawn(config.client_config(), WsConnector::new());
//! let handle = service.handle();
//!
//! handle.send(serde_json::json!({"type": "subscribe", "events": ["call_event"]}))?;
//! let mut updates = handle.subscribe();
//! while updates.changed().await.is_ok() {
//!     let snapshot = updates.borrow().clone();
//!     // render snapshot.status / snapshot.last_message
//! }
//!
//! service.shutdown().await;
//! ```

pub mod backoff;
pub mod client;
pub mod message;
pub mod service;
pub mod timer;
pub mod transport;

use serde::Serialize;

/// Connection status published to collaborators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Not connected. Initial state, and the state after any close.
    #[default]
    Disconnected,
    /// A handle exists and is performing its handshake.
    Connecting,
    /// Handshake complete; heartbeat running.
    Connected,
    /// The transport reported an error.
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Visibility of the hosting page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// The page is in the foreground.
    Visible,
    /// The page is hidden (background tab, minimized window).
    Hidden,
}

/// Read-only view of the client state for rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChannelSnapshot {
    /// Current connection status.
    pub status: ConnectionStatus,
    /// Most recent successfully parsed inbound message.
    pub last_message: Option<message::ChannelMessage>,
    /// Number of successful opens since the service started.
    pub connection_count: u64,
    /// Consecutive reconnect attempts since the last successful open.
    pub reconnect_attempts: u32,
}

/// Errors that can occur during channel operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The transport could not be constructed (bad URL, no runtime).
    ConnectionFailed(String),
    /// The transport refused an outgoing frame.
    SendFailed(String),
    /// A payload could not be serialized to JSON.
    Serialization(String),
    /// The channel service has shut down.
    Closed,
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed(msg) => write!(f, "Connection failed: {msg}"),
            Self::SendFailed(msg) => write!(f, "Send failed: {msg}"),
            Self::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            Self::Closed => write!(f, "Channel service closed"),
        }
    }
}

impl std::error::Error for ChannelError {}

// Re-exports
pub use backoff::{ReconnectPolicy, ReconnectState};
pub use client::{ChannelClient, ClientConfig, ClientEvent};
pub use message::{ChannelMessage, MessageKind, OutboundMessage};
pub use service::{ChannelService, ChannelServiceHandle};
pub use timer::TimerHandle;
pub use transport::{
    Connector, EventSink, ReadyState, TransportEvent, TransportHandle, WsConnector,
};
