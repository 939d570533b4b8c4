use serde::{Deserialize, Serialize};

/// Behaviour of the subscription registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Share one server subscription between identical `(query, args)` pairs.
    /// Default: true
    #[serde(default = "default_deduplicate")]
    pub deduplicate: bool,

    /// Upper bound on live handles. Default: None (unbounded)
    #[serde(default)]
    pub max_subscriptions: Option<usize>,

    /// Queue updates received while a handle is paused and replay them in
    /// arrival order on resume. When false they are dropped and only the
    /// next live update is delivered. Default: false
    #[serde(default)]
    pub queue_updates_while_paused: bool,
}

fn default_deduplicate() -> bool {
    true
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            deduplicate: true,
            max_subscriptions: None,
            queue_updates_while_paused: false,
        }
    }
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deduplicate(mut self, enabled: bool) -> Self {
        self.deduplicate = enabled;
        self
    }

    pub fn with_max_subscriptions(mut self, max: Option<usize>) -> Self {
        self.max_subscriptions = max;
        self
    }

    pub fn with_queue_updates_while_paused(mut self, queue: bool) -> Self {
        self.queue_updates_while_paused = queue;
        self
    }
}
