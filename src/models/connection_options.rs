use serde::{Deserialize, Serialize};

/// Connection-level options for the sync WebSocket.
///
/// These options control:
/// - Automatic reconnection on connection loss
/// - Reconnection timing and retry limits
/// - What happens to subscriptions when the client gives up
///
/// Separate from [`SubscriptionOptions`](super::SubscriptionOptions) which
/// control individual subscriptions.
///
/// # Example
///
/// ```rust
/// use synclink::ConnectionOptions;
///
/// let options = ConnectionOptions::default()
///     .with_auto_reconnect(true)
///     .with_reconnect_delay_ms(2000)
///     .with_max_reconnect_attempts(10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Enable automatic reconnection on connection loss
    /// Default: true
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Base delay in milliseconds for reconnection backoff.
    /// Attempt `n` (1-based) waits `reconnect_delay_ms * 2^(n-1)`.
    /// Default: 1000ms
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Optional ceiling for the backoff delay.
    /// Default: None (uncapped)
    #[serde(default)]
    pub max_reconnect_delay_ms: Option<u64>,

    /// Maximum number of reconnection attempts before giving up.
    /// Default: 10. Set to 0 to never reconnect.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// When retries are exhausted, push a `RECONNECT_EXHAUSTED` error to
    /// every live subscription instead of leaving them pending.
    /// Default: false
    #[serde(default)]
    pub fail_subscriptions_on_give_up: bool,

    /// Path appended to the base URL for the sync endpoint.
    /// Default: `/api/sync`
    #[serde(default = "default_sync_path")]
    pub sync_path: String,
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_sync_path() -> String {
    "/api/sync".to_string()
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: None,
            max_reconnect_attempts: 10,
            fail_subscriptions_on_give_up: false,
            sync_path: default_sync_path(),
        }
    }
}

impl ConnectionOptions {
    /// Create new connection options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to automatically reconnect on connection loss
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the base delay between reconnection attempts (in milliseconds)
    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    /// Cap the backoff delay (in milliseconds)
    pub fn with_max_reconnect_delay_ms(mut self, max_delay_ms: Option<u64>) -> Self {
        self.max_reconnect_delay_ms = max_delay_ms;
        self
    }

    /// Set the maximum number of reconnection attempts
    pub fn with_max_reconnect_attempts(mut self, max_attempts: u32) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self
    }

    /// Fail every live subscription once reconnection gives up
    pub fn with_fail_subscriptions_on_give_up(mut self, enabled: bool) -> Self {
        self.fail_subscriptions_on_give_up = enabled;
        self
    }

    /// Override the sync endpoint path
    pub fn with_sync_path(mut self, path: impl Into<String>) -> Self {
        self.sync_path = path.into();
        self
    }
}
