//! Persistent sync connection.
//!
//! - [`machine`]: the connection state machine (pure, no I/O)
//! - `websocket`: endpoint resolution, connect, frame decoding
//! - `shared`: the background task driving one WebSocket for all subscriptions
//!
//! The task connects on construction, authenticates and replays every live
//! subscription on each open, keeps the socket alive with application-level
//! `ping`/`pong`, and reconnects with exponential backoff until the attempt
//! budget runs out.

pub mod machine;
pub(crate) mod shared;
pub(crate) mod websocket;

pub use machine::{backoff_delay, ConnectionState};
pub(crate) use shared::{ConnCmd, ConnectionConfig, SharedConnection};
pub(crate) use websocket::resolve_ws_url;
