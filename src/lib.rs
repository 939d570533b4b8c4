//! # synclink
//!
//! Real-time sync client: live query subscriptions over one persistent
//! WebSocket, with deduplication, result caching, keep-alive and
//! reconnection with exponential backoff.
//!
//! ## Layers
//!
//! - [`codec`]: lossless value encoding (`$int64`, `$bytes`, `$date`, `$id`
//!   markers) and the protocol message envelope
//! - [`connection`]: the connection state machine and the background task
//!   that owns the socket
//! - [`subscription`]: the registry that shares one server subscription
//!   between identical `(query, args)` pairs
//! - [`SyncLinkClient`]: the application-facing API
//!
//! ## Example
//!
//! ```rust,no_run
//! use synclink::{SubscriptionEvent, SyncLinkClient, Value};
//!
//! # async fn example() -> synclink::Result<()> {
//! let client = SyncLinkClient::builder()
//!     .base_url("https://sync.example.com")
//!     .jwt_token("eyJhbGc...")
//!     .build()?;
//!
//! let args = Value::object([("channel", Value::from("general"))]);
//! let mut live = client.subscribe("messages:list", Some(args)).await?;
//! while let Some(event) = live.next().await {
//!     if let SubscriptionEvent::Update(rows) = event {
//!         println!("{:?}", rows);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod codec;
pub mod connection;
pub mod error;
pub mod event_handlers;
pub mod models;
pub mod subscription;
pub mod timeouts;

pub use auth::AuthProvider;
pub use client::{SyncLinkClient, SyncLinkClientBuilder};
pub use codec::{
    decode_binary, decode_message, decode_value, encode_binary, encode_message, encode_value,
    validate_with_schema, EncodeOptions, FieldSchema, Modification, ModificationKind, RecordId,
    RequestKind, Schema, SharedValue, Value, WireMessage,
};
pub use connection::{backoff_delay, ConnectionState};
pub use error::{Result, SubscriptionErrorCode, SyncLinkError};
pub use event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
pub use models::{
    ConnectionOptions, RegistryConfig, RemoteError, SubscriptionId, SubscriptionInfo,
    SubscriptionOptions, SubscriptionPriority, SubscriptionStatus,
};
pub use subscription::{
    query_fingerprint, LiveQuery, SubscriptionEvent, SubscriptionHandlers, SubscriptionRegistry,
};
pub use timeouts::{SyncLinkTimeouts, SyncLinkTimeoutsBuilder};
