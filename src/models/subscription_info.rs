use std::sync::Arc;

use crate::codec::Value;

use super::remote_error::RemoteError;
use super::subscription_id::SubscriptionId;
use super::subscription_options::SubscriptionPriority;
use super::subscription_status::SubscriptionStatus;

/// Point-in-time snapshot of a subscription handle.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    /// Remote function the subscription watches.
    pub query_path: String,
    /// Arguments as supplied by the application (`None` = no arguments).
    pub args: Option<Value>,
    pub status: SubscriptionStatus,
    /// Last delivered result. Shared with every handle on the same query.
    pub data: Option<Arc<Value>>,
    /// Last error, cleared by the next successful update.
    pub error: Option<RemoteError>,
    pub error_count: u32,
    pub update_count: u64,
    /// Millis since Unix epoch.
    pub created_at_ms: u64,
    /// Millis since Unix epoch of the last state change.
    pub updated_at_ms: u64,
    pub priority: SubscriptionPriority,
}
