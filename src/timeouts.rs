//! Timeout configuration for the sync connection.
//!
//! Keep-alive uses application-level `ping`/`pong` messages: a `ping` is
//! sent every `keepalive_interval` unless one is still unanswered, and the
//! connection is presumed dead when no `pong` arrives within
//! `pong_timeout`.

use std::time::Duration;

/// Timeout configuration for sync client operations.
///
/// # Examples
///
/// ```rust
/// use synclink::SyncLinkTimeouts;
/// use std::time::Duration;
///
/// // Use defaults (30s ping, 10s pong timeout)
/// let timeouts = SyncLinkTimeouts::default();
///
/// // Custom keep-alive
/// let timeouts = SyncLinkTimeouts::builder()
///     .keepalive_interval(Duration::from_secs(15))
///     .pong_timeout(Duration::from_secs(5))
///     .build();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncLinkTimeouts {
    /// Timeout for establishing the WebSocket (TCP + TLS + upgrade).
    /// Default: 10 seconds
    pub connection_timeout: Duration,

    /// Interval between keep-alive pings. Set to 0 to disable keep-alive.
    /// Default: 30 seconds
    pub keepalive_interval: Duration,

    /// Maximum wait for a `pong` after a `ping`. Set to 0 to disable the
    /// dead-connection check.
    /// Default: 10 seconds
    pub pong_timeout: Duration,

    /// Maximum wait for a mutation/action result. Set to 0 to wait forever.
    /// Default: 30 seconds
    pub request_timeout: Duration,
}

impl Default for SyncLinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_millis(30_000),
            pong_timeout: Duration::from_millis(10_000),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl SyncLinkTimeouts {
    pub fn builder() -> SyncLinkTimeoutsBuilder {
        SyncLinkTimeoutsBuilder::new()
    }

    /// Short timeouts for localhost development and tests.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            keepalive_interval: Duration::from_secs(5),
            pong_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
        }
    }

    /// Check if a duration represents "no timeout" (zero or very large).
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365)
    }
}

/// Builder for [`SyncLinkTimeouts`].
#[derive(Debug, Clone)]
pub struct SyncLinkTimeoutsBuilder {
    timeouts: SyncLinkTimeouts,
}

impl SyncLinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: SyncLinkTimeouts::default(),
        }
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.timeouts.keepalive_interval = interval;
        self
    }

    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.pong_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.request_timeout = timeout;
        self
    }

    pub fn build(self) -> SyncLinkTimeouts {
        self.timeouts
    }
}
