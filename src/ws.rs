//! Shared WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves. The channel transport uses this module rather
//! than `tokio-tungstenite` directly.
//!
//! # Architecture
//!
//! A single [`connect`] function handles URL→request building and TLS
//! negotiation. It returns a ([`WsWriter`], [`WsReader`]) pair ready for use
//! in `tokio::select!` loops. [`endpoint_url`] derives the live-updates URL
//! from the hosting origin, switching `http`/`https` to `ws`/`wss`.

use std::borrow::Cow;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use crate::constants::CLOSE_ABNORMAL;

/// Concrete WebSocket stream type (avoids repeating the 6-line generic everywhere).
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Received WebSocket message.
#[derive(Debug)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal). A close frame without a
        /// code is reported as 1006.
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a UTF-8 text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails (connection closed, I/O error).
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("WebSocket send_text failed")
    }

    /// Send a close frame carrying `code` and `reason`.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    pub async fn send_close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason.to_string()),
        };
        self.sink
            .send(tungstenite::Message::Close(Some(frame)))
            .await
            .context("WebSocket send_close failed")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Raw `Frame` variants are skipped internally.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(WsMessage::Text(text)));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    return Some(Ok(WsMessage::Binary(data)));
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    return Some(Ok(WsMessage::Ping(data)));
                }
                Some(Ok(tungstenite::Message::Pong(data))) => {
                    return Some(Ok(WsMessage::Pong(data)));
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((CLOSE_ABNORMAL, String::new()));
                    return Some(Ok(WsMessage::Close { code, reason }));
                }
                Some(Ok(tungstenite::Message::Frame(_))) => {
                    // Raw frames: skip
                    continue;
                }
                Some(Err(e)) => {
                    return Some(Err(anyhow::anyhow!("WebSocket read error: {e}")));
                }
                None => return None,
            }
        }
    }
}

/// Validate `url` as a WebSocket client request without connecting.
///
/// # Errors
///
/// Returns an error if the URL cannot be turned into a handshake request or
/// does not use the `ws`/`wss` scheme.
pub fn validate_url(url: &str) -> Result<()> {
    use tungstenite::client::IntoClientRequest;

    let request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    match request.uri().scheme_str() {
        Some("ws" | "wss") => Ok(()),
        other => anyhow::bail!("unsupported WebSocket scheme {other:?} in {url}"),
    }
}

/// Connect to a WebSocket URL.
///
/// Builds an HTTP request from `url` and performs the WebSocket handshake.
/// Returns split (writer, reader) halves for independent use in
/// `tokio::select!` loops.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the WebSocket handshake fails.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;

    let request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .context("WebSocket connect failed")?;

    let (sink, stream) = ws_stream.split();

    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replace("https://", "wss://")
            .replace("http://", "ws://")
    }
}

/// Derive the channel endpoint from the hosting origin and a well-known path.
///
/// The scheme follows the origin's: `https` pages talk `wss`, `http` pages
/// talk `ws`.
#[must_use]
pub fn endpoint_url(origin: &str, path: &str) -> String {
    let base = http_to_ws_scheme(origin.trim_end_matches('/'));
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_to_ws_scheme_https() {
        assert_eq!(
            http_to_ws_scheme("https://carehome.example"),
            "wss://carehome.example"
        );
    }

    #[test]
    fn test_http_to_ws_scheme_http() {
        assert_eq!(
            http_to_ws_scheme("http://localhost:8000"),
            "ws://localhost:8000"
        );
    }

    #[test]
    fn test_http_to_ws_scheme_passthrough() {
        assert_eq!(
            http_to_ws_scheme("wss://carehome.example/ws/live-updates"),
            "wss://carehome.example/ws/live-updates"
        );
        assert_eq!(
            http_to_ws_scheme("ws://localhost:8000/ws/live-updates"),
            "ws://localhost:8000/ws/live-updates"
        );
    }

    #[test]
    fn test_endpoint_url_secure_origin() {
        assert_eq!(
            endpoint_url("https://carehome.example", "/ws/live-updates"),
            "wss://carehome.example/ws/live-updates"
        );
    }

    #[test]
    fn test_endpoint_url_insecure_origin_with_port() {
        assert_eq!(
            endpoint_url("http://localhost:8000/", "/ws/live-updates"),
            "ws://localhost:8000/ws/live-updates"
        );
    }

    #[test]
    fn test_endpoint_url_adds_missing_slash() {
        assert_eq!(
            endpoint_url("http://localhost:8000", "ws/call-status"),
            "ws://localhost:8000/ws/call-status"
        );
    }

    #[test]
    fn test_validate_url_rejects_garbage() {
        assert!(validate_url("not-a-url").is_err());
        assert!(validate_url("ws://localhost:8000/ws/live-updates").is_ok());
    }

    #[tokio::test]
    async fn test_connect_invalid_url_returns_error() {
        let result = connect("not-a-url").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_unreachable_host_returns_error() {
        let result = connect("ws://127.0.0.1:1/ws/live-updates").await;
        assert!(result.is_err());
    }
}
