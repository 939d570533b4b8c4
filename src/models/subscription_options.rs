use serde::{Deserialize, Serialize};

/// Scheduling hint attached to a subscription. Not interpreted by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Per-subscription options.
///
/// # Example
///
/// ```rust
/// use synclink::{SubscriptionOptions, SubscriptionPriority};
///
/// let options = SubscriptionOptions::new()
///     .with_priority(SubscriptionPriority::High)
///     .with_skip_initial_callback(true);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionOptions {
    /// Do not deliver an already cached result when attaching to a shared
    /// query; wait for the next server update instead.
    #[serde(default)]
    pub skip_initial_callback: bool,

    /// Scheduling hint.
    #[serde(default)]
    pub priority: SubscriptionPriority,

    /// Queue updates that arrive while paused and replay them on resume.
    /// `None` falls back to [`RegistryConfig::queue_updates_while_paused`](super::RegistryConfig).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_updates_while_paused: Option<bool>,
}

impl SubscriptionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skip_initial_callback(mut self, skip: bool) -> Self {
        self.skip_initial_callback = skip;
        self
    }

    pub fn with_priority(mut self, priority: SubscriptionPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_queue_updates_while_paused(mut self, queue: bool) -> Self {
        self.queue_updates_while_paused = Some(queue);
        self
    }
}
