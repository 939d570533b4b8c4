//! WebSocket transport helpers: endpoint resolution, connect and frame decoding.

use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use crate::codec::{decode_binary, decode_message, WireMessage};
use crate::error::{Result, SyncLinkError};
use crate::timeouts::SyncLinkTimeouts;

pub(crate) type WebSocketStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

const MAX_WS_TEXT_MESSAGE_BYTES: usize = 64 << 20; // 64 MiB
const MAX_WS_BINARY_MESSAGE_BYTES: usize = 16 << 20; // 16 MiB

/// Derive the sync endpoint from an HTTP(S) base URL.
///
/// `http` becomes `ws`, `https` becomes `wss` (ws/wss are accepted as-is),
/// and `sync_path` is appended to the base path.
pub(crate) fn resolve_ws_url(base_url: &str, sync_path: &str) -> Result<String> {
    let base = Url::parse(base_url.trim()).map_err(|e| {
        SyncLinkError::ConfigurationError(format!("Invalid base_url '{}': {}", base_url, e))
    })?;
    validate_base_url(&base)?;

    let ws_scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SyncLinkError::ConfigurationError(format!(
                "Unsupported base_url scheme '{}'; expected http(s) or ws(s)",
                other
            )));
        },
    };

    let mut ws_url = base.clone();
    ws_url.set_scheme(ws_scheme).map_err(|_| {
        SyncLinkError::ConfigurationError("Failed to set WebSocket URL scheme".to_string())
    })?;
    let prefix = base.path().trim_end_matches('/');
    let suffix = sync_path.trim_start_matches('/');
    ws_url.set_path(&format!("{}/{}", prefix, suffix));
    ws_url.set_query(None);
    ws_url.set_fragment(None);

    Ok(ws_url.to_string())
}

fn validate_base_url(url: &Url) -> Result<()> {
    if url.host_str().is_none() {
        return Err(SyncLinkError::ConfigurationError("base_url must include a host".to_string()));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(SyncLinkError::ConfigurationError(
            "base_url must not include username/password credentials".to_string(),
        ));
    }
    Ok(())
}

/// Open the WebSocket, bounded by `connection_timeout` unless that is disabled.
pub(crate) async fn connect(url: &str, timeouts: &SyncLinkTimeouts) -> Result<WebSocketStream> {
    let connect = connect_async(url);
    let result = if SyncLinkTimeouts::is_no_timeout(timeouts.connection_timeout) {
        connect.await
    } else {
        match tokio::time::timeout(timeouts.connection_timeout, connect).await {
            Ok(result) => result,
            Err(_) => {
                return Err(SyncLinkError::TimeoutError(format!(
                    "Connection to {} timed out after {:?}",
                    url, timeouts.connection_timeout
                )));
            },
        }
    };
    let (stream, _response) = result
        .map_err(|e| SyncLinkError::WebSocketError(format!("Failed to connect to {}: {}", url, e)))?;
    Ok(stream)
}

/// What a single inbound frame means to the driver.
#[derive(Debug)]
pub(crate) enum InboundFrame {
    Message(WireMessage),
    Malformed(SyncLinkError),
    /// WebSocket-level ping that must be answered.
    Ping(bytes::Bytes),
    Close(Option<(u16, String)>),
    Ignored,
}

/// Decode one frame. Text and binary frames also return their raw text
/// for the receive hook.
pub(crate) fn decode_frame(frame: Message) -> (Option<String>, InboundFrame) {
    match frame {
        Message::Text(text) => {
            let text = text.as_str().to_string();
            if text.len() > MAX_WS_TEXT_MESSAGE_BYTES {
                let error = SyncLinkError::WebSocketError(format!(
                    "Text WebSocket message too large ({} bytes > {} bytes)",
                    text.len(),
                    MAX_WS_TEXT_MESSAGE_BYTES
                ));
                return (None, InboundFrame::Malformed(error));
            }
            let parsed = match decode_message(&text) {
                Ok(msg) => InboundFrame::Message(msg),
                Err(error) => InboundFrame::Malformed(error),
            };
            (Some(text), parsed)
        },
        Message::Binary(data) => {
            if data.len() > MAX_WS_BINARY_MESSAGE_BYTES {
                let error = SyncLinkError::WebSocketError(format!(
                    "Binary WebSocket message too large ({} bytes > {} bytes)",
                    data.len(),
                    MAX_WS_BINARY_MESSAGE_BYTES
                ));
                return (None, InboundFrame::Malformed(error));
            }
            let raw = String::from_utf8_lossy(&data).into_owned();
            let parsed = match decode_binary(&data) {
                Ok(msg) => InboundFrame::Message(msg),
                Err(error) => InboundFrame::Malformed(error),
            };
            (Some(raw), parsed)
        },
        Message::Ping(payload) => (None, InboundFrame::Ping(payload)),
        Message::Close(frame) => (
            None,
            InboundFrame::Close(frame.map(|f| (u16::from(f.code), f.reason.as_str().to_string()))),
        ),
        Message::Pong(_) | Message::Frame(_) => (None, InboundFrame::Ignored),
    }
}
