use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a subscription handle.
///
/// ```text
/// Pending --update--> Active
/// Active|Pending --error--> Error --update--> Active
/// Active|Pending --pause--> Paused --resume--> Active (had data) | Pending
/// any --remove--> Completed (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Waiting for the first (or next, after a reconnect) result.
    Pending,
    /// Holding a current result.
    Active,
    /// Callbacks suspended by the application.
    Paused,
    /// The server reported an error for this query.
    Error,
    /// Removed; no further transitions.
    Completed,
}

impl SubscriptionStatus {
    /// Whether the handle has reached its terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionStatus::Completed)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Error => "error",
            SubscriptionStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}
