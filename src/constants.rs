//! Protocol constants for the live-updates channel.
//!
//! This module centralizes the magic numbers of the channel protocol so the
//! defaults in [`crate::config::Config`] and the state machine agree. Constants
//! are grouped by domain.
//!
//! # Categories
//!
//! - **Endpoint**: well-known paths on the hosting origin
//! - **Close codes**: WebSocket close codes the client reasons about
//! - **Reconnection**: backoff base, ceiling and attempt cap
//! - **Heartbeat**: keep-alive interval

use std::time::Duration;

// ============================================================================
// Endpoint
// ============================================================================

/// Path of the live-updates endpoint on the hosting origin.
pub const LIVE_UPDATES_PATH: &str = "/ws/live-updates";

/// Path of the call-status endpoint (same message framing, call events only).
pub const CALL_STATUS_PATH: &str = "/ws/call-status";

/// Origin used when nothing is configured (the local API server).
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000";

// ============================================================================
// Close codes
// ============================================================================

/// Normal closure. Never triggers a reconnect.
pub const CLOSE_NORMAL: u16 = 1000;

/// Abnormal closure: the connection dropped without a close frame.
///
/// Reported for streams that end without a close handshake and for
/// transport errors, the way browsers report them.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Reason sent with [`CLOSE_NORMAL`] on an explicit disconnect.
pub const USER_DISCONNECT_REASON: &str = "User disconnected";

// ============================================================================
// Reconnection
// ============================================================================

/// Delay before the first reconnect attempt. Doubles on every attempt.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Upper bound on the reconnect delay.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Consecutive failed attempts after which automatic retries stop.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

// ============================================================================
// Heartbeat
// ============================================================================

/// Interval between `ping` messages while connected.
///
/// The server answers each ping with a `pong` and records the time as the
/// connection's last-seen timestamp.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// Delivery
// ============================================================================

/// Inbound messages buffered per subscriber before a slow reader lags.
pub const MESSAGE_BUFFER: usize = 256;
