//! Care Home Live - resilient live-updates channel client.
//!
//! This crate provides the dashboard's connection to the care-home API's
//! real-time endpoint: one WebSocket, a status state machine, a heartbeat
//! and exponential-backoff reconnection with visibility-triggered recovery.
//!
//! # Architecture
//!
//! - **ChannelService** - Event loop, exclusively owns the client
//! - **ChannelClient** - Synchronous state machine (status, timers, handle)
//! - **Connector** - Transport seam; [`channel::WsConnector`] in production
//!
//! # Modules
//!
//! - [`channel`] - State machine, service, transport, wire messages
//! - [`config`] - Configuration loading/saving
//! - [`ws`] - tokio-tungstenite wrapper

// Library modules
pub mod channel;
pub mod config;
pub mod constants;
pub mod env;
pub mod ws;

// Re-export commonly used types
pub use channel::{
    ChannelError, ChannelMessage, ChannelService, ChannelServiceHandle, ChannelSnapshot,
    ClientConfig, ConnectionStatus, MessageKind, Visibility, WsConnector,
};
pub use config::Config;
