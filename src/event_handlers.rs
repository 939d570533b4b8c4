//! Connection lifecycle event handlers.
//!
//! The connection manager reports everything observable through these
//! callbacks instead of printing:
//!
//! - [`on_connect`](EventHandlers::on_connect): transport open (auth sent, subscriptions replayed)
//! - [`on_disconnect`](EventHandlers::on_disconnect): transport closed or presumed dead
//! - [`on_error`](EventHandlers::on_error): transport errors, unparseable or unroutable frames
//! - [`on_reconnecting`](EventHandlers::on_reconnecting): a backoff reconnect was scheduled
//! - [`on_reconnect_exhausted`](EventHandlers::on_reconnect_exhausted): retries used up, client is idle
//! - [`on_receive`](EventHandlers::on_receive) / [`on_send`](EventHandlers::on_send): raw frame debug hooks
//!
//! # Example
//!
//! ```rust
//! use synclink::EventHandlers;
//!
//! let handlers = EventHandlers::new()
//!     .on_connect(|| println!("connected"))
//!     .on_disconnect(|reason| println!("disconnected: {}", reason))
//!     .on_reconnect_exhausted(|attempts| eprintln!("gave up after {} attempts", attempts));
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Reason for a disconnect event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    /// Human-readable description of why the connection closed.
    pub message: String,
    /// WebSocket close code, if available (e.g. 1000 = normal, 1006 = abnormal).
    pub code: Option<u16>,
}

impl DisconnectReason {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "{} (code: {})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Error information passed to the `on_error` handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionError {
    pub message: String,
    /// Whether the connection stays usable (or auto-reconnect may recover it).
    pub recoverable: bool,
}

impl ConnectionError {
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

pub type OnConnectCallback = Arc<dyn Fn() + Send + Sync>;
pub type OnDisconnectCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;
pub type OnErrorCallback = Arc<dyn Fn(ConnectionError) + Send + Sync>;
/// `(attempt, delay)` of the scheduled reconnect.
pub type OnReconnectingCallback = Arc<dyn Fn(u32, Duration) + Send + Sync>;
/// Number of attempts made before giving up.
pub type OnReconnectExhaustedCallback = Arc<dyn Fn(u32) + Send + Sync>;
pub type OnReceiveCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type OnSendCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Connection lifecycle event handlers. All optional.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub(crate) on_connect: Option<OnConnectCallback>,
    pub(crate) on_disconnect: Option<OnDisconnectCallback>,
    pub(crate) on_error: Option<OnErrorCallback>,
    pub(crate) on_reconnecting: Option<OnReconnectingCallback>,
    pub(crate) on_reconnect_exhausted: Option<OnReconnectExhaustedCallback>,
    pub(crate) on_receive: Option<OnReceiveCallback>,
    pub(crate) on_send: Option<OnSendCallback>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_reconnecting", &self.on_reconnecting.is_some())
            .field("on_reconnect_exhausted", &self.on_reconnect_exhausted.is_some())
            .field("on_receive", &self.on_receive.is_some())
            .field("on_send", &self.on_send.is_some())
            .finish()
    }
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when the transport opens.
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Called when an open transport closes, including forced reconnects
    /// after a pong timeout.
    pub fn on_disconnect(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Called for transport errors and for inbound frames that could not be
    /// decoded or routed. The connection is kept alive for recoverable errors.
    pub fn on_error(mut self, f: impl Fn(ConnectionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Called each time a backoff reconnect is scheduled.
    pub fn on_reconnecting(mut self, f: impl Fn(u32, Duration) + Send + Sync + 'static) -> Self {
        self.on_reconnecting = Some(Arc::new(f));
        self
    }

    /// Called once the reconnect budget is used up. The client stays
    /// disconnected until [`SyncLinkClient::reconnect`](crate::SyncLinkClient::reconnect)
    /// or [`close`](crate::SyncLinkClient::close).
    pub fn on_reconnect_exhausted(mut self, f: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_reconnect_exhausted = Some(Arc::new(f));
        self
    }

    /// Debug hook: raw text of every inbound frame, before parsing.
    pub fn on_receive(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_receive = Some(Arc::new(f));
        self
    }

    /// Debug hook: raw text of every outbound frame.
    pub fn on_send(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_send = Some(Arc::new(f));
        self
    }

    /// Returns `true` if any handler is registered.
    pub fn has_any(&self) -> bool {
        self.on_connect.is_some()
            || self.on_disconnect.is_some()
            || self.on_error.is_some()
            || self.on_reconnecting.is_some()
            || self.on_reconnect_exhausted.is_some()
            || self.on_receive.is_some()
            || self.on_send.is_some()
    }

    // ---------------------------------------------------------------
    // Internal dispatch helpers
    // ---------------------------------------------------------------

    pub(crate) fn emit_connect(&self) {
        if let Some(cb) = &self.on_connect {
            cb();
        }
    }

    pub(crate) fn emit_disconnect(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.on_disconnect {
            cb(reason);
        }
    }

    pub(crate) fn emit_error(&self, error: ConnectionError) {
        if let Some(cb) = &self.on_error {
            cb(error);
        }
    }

    pub(crate) fn emit_reconnecting(&self, attempt: u32, delay: Duration) {
        if let Some(cb) = &self.on_reconnecting {
            cb(attempt, delay);
        }
    }

    pub(crate) fn emit_reconnect_exhausted(&self, attempts: u32) {
        if let Some(cb) = &self.on_reconnect_exhausted {
            cb(attempts);
        }
    }

    pub(crate) fn emit_receive(&self, raw: &str) {
        if let Some(cb) = &self.on_receive {
            cb(raw);
        }
    }

    pub(crate) fn emit_send(&self, raw: &str) {
        if let Some(cb) = &self.on_send {
            cb(raw);
        }
    }
}
