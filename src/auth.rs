//! Authentication for the sync connection.
//!
//! The token store itself lives outside this crate; the connection manager
//! only needs "give me a bearer token" and "give me the authenticate
//! message", both provided by [`AuthProvider`].

use crate::codec::WireMessage;

/// Credentials sent after the transport opens.
///
/// # Examples
///
/// ```rust
/// use synclink::AuthProvider;
///
/// let auth = AuthProvider::jwt_token("eyJhbGc...".to_string());
/// assert_eq!(auth.token(), Some("eyJhbGc..."));
///
/// let anonymous = AuthProvider::none();
/// assert!(anonymous.auth_message().is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthProvider {
    /// Bearer token (typically a JWT)
    JwtToken(String),

    /// Anonymous connection
    #[default]
    None,
}

impl AuthProvider {
    pub fn jwt_token(token: String) -> Self {
        Self::JwtToken(token)
    }

    pub fn none() -> Self {
        Self::None
    }

    /// The bearer token, if any.
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::JwtToken(token) => Some(token),
            Self::None => None,
        }
    }

    /// The `authenticate` message to send on open, if any.
    pub fn auth_message(&self) -> Option<WireMessage> {
        self.token().map(|token| WireMessage::Authenticate {
            token: token.to_string(),
        })
    }

    /// Check if authentication is configured
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl From<Option<String>> for AuthProvider {
    fn from(token: Option<String>) -> Self {
        match token {
            Some(t) => Self::JwtToken(t),
            None => Self::None,
        }
    }
}
