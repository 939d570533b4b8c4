//! Error types for synclink.
//!
//! Codec failures (`SerializationError`, `DeserializationError`,
//! `SchemaValidationError`) are always returned to the caller of the
//! encode/decode function. Registry misuse is reported as
//! `SubscriptionError` with a machine-readable [`SubscriptionErrorCode`].

use crate::models::SubscriptionId;
use std::fmt;
use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, SyncLinkError>;

/// Machine-readable reason attached to [`SyncLinkError::SubscriptionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionErrorCode {
    /// The registry (or the client owning it) has been disposed.
    Disposed,
    /// `max_subscriptions` would be exceeded.
    LimitExceeded,
    /// The connection gave up reconnecting.
    ReconnectExhausted,
    /// The connection task is gone.
    ConnectionClosed,
}

impl SubscriptionErrorCode {
    /// Wire/log representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionErrorCode::Disposed => "DISPOSED",
            SubscriptionErrorCode::LimitExceeded => "LIMIT_EXCEEDED",
            SubscriptionErrorCode::ReconnectExhausted => "RECONNECT_EXHAUSTED",
            SubscriptionErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
        }
    }
}

impl fmt::Display for SubscriptionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the sync client.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncLinkError {
    /// A value cannot be represented on the wire.
    #[error("Serialization error at {path}: {message}")]
    SerializationError { message: String, path: String },

    /// A wire payload is malformed.
    #[error("Deserialization error{}: {message}", .field.as_ref().map(|f| format!(" (field '{}')", f)).unwrap_or_default())]
    DeserializationError {
        message: String,
        field: Option<String>,
    },

    /// A value does not match the expected structural schema.
    #[error("Schema validation failed at {path}: expected {expected}, received {received}")]
    SchemaValidationError {
        expected: String,
        received: String,
        path: String,
    },

    /// Registry-level misuse or lifecycle failure.
    #[error("Subscription error [{code}]: {message}")]
    SubscriptionError {
        code: SubscriptionErrorCode,
        message: String,
        subscription_id: Option<SubscriptionId>,
    },

    /// Transport-level failure.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An operation did not complete in time.
    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// The server reported a failed mutation or action.
    #[error("Server error{}: {message}", .code.as_ref().map(|c| format!(" [{}]", c)).unwrap_or_default())]
    ServerError {
        message: String,
        code: Option<String>,
    },

    /// The operation needs an open connection.
    #[error("Not connected")]
    NotConnected,
}

impl SyncLinkError {
    pub(crate) fn serialization(message: impl Into<String>, path: &str) -> Self {
        SyncLinkError::SerializationError {
            message: message.into(),
            path: path.to_string(),
        }
    }

    pub(crate) fn deserialization(message: impl Into<String>) -> Self {
        SyncLinkError::DeserializationError {
            message: message.into(),
            field: None,
        }
    }

    pub(crate) fn missing_field(field: &str) -> Self {
        SyncLinkError::DeserializationError {
            message: format!("missing required field '{}'", field),
            field: Some(field.to_string()),
        }
    }

    pub(crate) fn subscription(
        code: SubscriptionErrorCode,
        message: impl Into<String>,
        subscription_id: Option<SubscriptionId>,
    ) -> Self {
        SyncLinkError::SubscriptionError {
            code,
            message: message.into(),
            subscription_id,
        }
    }

    /// Returns the subscription error code, if this is a `SubscriptionError`.
    pub fn subscription_code(&self) -> Option<SubscriptionErrorCode> {
        match self {
            SyncLinkError::SubscriptionError { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialization_error_names_field() {
        let err = SyncLinkError::missing_field("args");
        assert_eq!(
            err.to_string(),
            "Deserialization error (field 'args'): missing required field 'args'"
        );
    }

    #[test]
    fn test_subscription_error_display_uses_code() {
        let err = SyncLinkError::subscription(
            SubscriptionErrorCode::LimitExceeded,
            "max 2 subscriptions",
            None,
        );
        assert_eq!(err.to_string(), "Subscription error [LIMIT_EXCEEDED]: max 2 subscriptions");
        assert_eq!(err.subscription_code(), Some(SubscriptionErrorCode::LimitExceeded));
    }

    #[test]
    fn test_subscription_codes_match_their_wire_names() {
        let codes = [
            (SubscriptionErrorCode::Disposed, "DISPOSED"),
            (SubscriptionErrorCode::LimitExceeded, "LIMIT_EXCEEDED"),
            (SubscriptionErrorCode::ReconnectExhausted, "RECONNECT_EXHAUSTED"),
            (SubscriptionErrorCode::ConnectionClosed, "CONNECTION_CLOSED"),
        ];
        for (code, name) in codes {
            assert_eq!(code.as_str(), name);
            assert_eq!(code.to_string(), name);
        }
    }

    #[test]
    fn test_server_error_display_without_code() {
        let err = SyncLinkError::ServerError {
            message: "boom".into(),
            code: None,
        };
        assert_eq!(err.to_string(), "Server error: boom");
    }
}
