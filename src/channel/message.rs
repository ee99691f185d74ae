//! Wire messages exchanged over the live-updates channel.
//!
//! Inbound frames are JSON objects tagged by a `type` field:
//!
//! ```json
//! {"type": "call_event", "data": {...}, "timestamp": "2024-05-01T10:00:00"}
//! {"type": "connection_established", "connection_id": "conn_1714557600.1", "timestamp": "..."}
//! ```
//!
//! The set of kinds the dashboard understands is closed, but the server also
//! emits acknowledgements such as `subscription_confirmed`. Those parse as
//! [`MessageKind::Other`] and are delivered like any other message.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Kind of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// A resident call was raised, acknowledged or resolved.
    CallEvent,
    /// A component health update.
    SystemStatus,
    /// A resident profile changed.
    ResidentUpdate,
    /// Greeting sent by the server right after the handshake.
    ConnectionEstablished,
    /// Reply to a heartbeat ping.
    Pong,
    /// Any kind outside the known set, kept verbatim.
    Other(String),
}

impl MessageKind {
    /// Wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::CallEvent => "call_event",
            Self::SystemStatus => "system_status",
            Self::ResidentUpdate => "resident_update",
            Self::ConnectionEstablished => "connection_established",
            Self::Pong => "pong",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for MessageKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "call_event" => Self::CallEvent,
            "system_status" => Self::SystemStatus,
            "resident_update" => Self::ResidentUpdate,
            "connection_established" => Self::ConnectionEstablished,
            "pong" => Self::Pong,
            _ => Self::Other(name),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound message delivered to collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Message kind (`type` on the wire).
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Kind-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// ISO-8601 timestamp assigned by the server.
    pub timestamp: String,
    /// Server-side connection identifier. Carried by `connection_established`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
}

impl ChannelMessage {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the frame is not an object with a string
    /// `type` and `timestamp`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Message the client originates on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Keep-alive sent every heartbeat interval.
    Ping {
        /// ISO-8601 send time.
        timestamp: String,
    },
    /// Ask the server to deliver the named event kinds.
    Subscribe {
        /// Event kinds, e.g. `call_event`.
        events: Vec<String>,
        /// ISO-8601 send time.
        timestamp: String,
    },
}

impl OutboundMessage {
    /// Heartbeat stamped with the current time.
    #[must_use]
    pub fn ping() -> Self {
        Self::Ping {
            timestamp: iso_timestamp(),
        }
    }

    /// Subscription request stamped with the current time.
    #[must_use]
    pub fn subscribe(events: Vec<String>) -> Self {
        Self::Subscribe {
            events,
            timestamp: iso_timestamp(),
        }
    }
}

/// Current UTC time as `2024-05-01T10:00:00.000Z`.
fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
