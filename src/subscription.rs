//! Live query subscriptions.
//!
//! [`SubscriptionRegistry`] holds the state; [`LiveQuery`] is the
//! channel-backed handle returned by
//! [`SyncLinkClient::subscribe`](crate::SyncLinkClient::subscribe).

pub mod fingerprint;
mod handlers;
mod live_query;
mod registry;

pub use fingerprint::query_fingerprint;
pub use handlers::{
    OnCompleteCallback, OnSubscriptionDisconnectCallback, OnSubscriptionErrorCallback,
    OnUpdateCallback, SubscriptionHandlers,
};
pub(crate) use live_query::channel_handlers;
pub use live_query::{LiveQuery, SubscriptionEvent};
pub use registry::SubscriptionRegistry;
