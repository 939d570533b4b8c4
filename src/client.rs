//! Main sync client with builder pattern.
//!
//! Provides the primary interface for live queries, mutations and actions
//! over one shared WebSocket connection.

use std::time::Duration;

use crate::{
    auth::AuthProvider,
    codec::{RequestKind, Value},
    connection::{resolve_ws_url, ConnCmd, ConnectionConfig, ConnectionState, SharedConnection},
    error::{Result, SyncLinkError},
    event_handlers::EventHandlers,
    models::{ConnectionOptions, RegistryConfig, SubscriptionId, SubscriptionInfo, SubscriptionOptions},
    subscription::{channel_handlers, LiveQuery, SubscriptionHandlers},
    timeouts::SyncLinkTimeouts,
};

/// Real-time sync client.
///
/// Use [`SyncLinkClientBuilder`] to construct instances. Building spawns the
/// connection task on the current tokio runtime, which starts connecting
/// right away. Subscriptions made before the connection opens are sent as
/// soon as it does.
///
/// # Examples
///
/// ```rust,no_run
/// use synclink::{SyncLinkClient, Value};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = SyncLinkClient::builder()
///     .base_url("http://localhost:3000")
///     .jwt_token("eyJhbGc...")
///     .build()?;
///
/// let mut live = client.subscribe("messages:list", None).await?;
/// client
///     .mutation("messages:send", Value::object([("body", Value::from("hi"))]))
///     .await?;
/// let first = live.next().await;
/// println!("{:?}", first);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SyncLinkClient {
    ws_url: String,
    timeouts: SyncLinkTimeouts,
    connection: SharedConnection,
}

impl std::fmt::Debug for SyncLinkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLinkClient")
            .field("ws_url", &self.ws_url)
            .field("state", &self.connection.state())
            .finish()
    }
}

impl SyncLinkClient {
    /// Create a new builder for configuring the client
    pub fn builder() -> SyncLinkClientBuilder {
        SyncLinkClientBuilder::new()
    }

    /// The resolved WebSocket endpoint.
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn timeouts(&self) -> &SyncLinkTimeouts {
        &self.timeouts
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Wait until the connection is open, or fail with `TimeoutError`.
    pub async fn wait_for_connection(&self, timeout: Duration) -> Result<()> {
        let mut state_rx = self.connection.state_receiver();
        let wait = async {
            loop {
                match *state_rx.borrow_and_update() {
                    ConnectionState::Open => return Ok(()),
                    ConnectionState::Closed => return Err(SyncLinkError::NotConnected),
                    _ => {},
                }
                if state_rx.changed().await.is_err() {
                    return Err(SyncLinkError::NotConnected);
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            SyncLinkError::TimeoutError(format!("Connection not open after {:?}", timeout))
        })?
    }

    /// Subscribe to a live query and receive its events on a [`LiveQuery`].
    pub async fn subscribe(&self, query_path: &str, args: Option<Value>) -> Result<LiveQuery> {
        self.subscribe_with_options(query_path, args, SubscriptionOptions::default()).await
    }

    /// [`subscribe`](Self::subscribe) with per-subscription options.
    pub async fn subscribe_with_options(
        &self,
        query_path: &str,
        args: Option<Value>,
        options: SubscriptionOptions,
    ) -> Result<LiveQuery> {
        let (handlers, event_rx) = channel_handlers();
        let id = self.subscribe_with(query_path, args, options, handlers).await?;
        Ok(LiveQuery::new(id, event_rx, self.connection.command_sender()))
    }

    /// Subscribe with callbacks instead of a channel. The subscription lives
    /// until [`unsubscribe`](Self::unsubscribe) or [`close`](Self::close).
    pub async fn subscribe_with(
        &self,
        query_path: &str,
        args: Option<Value>,
        options: SubscriptionOptions,
        handlers: SubscriptionHandlers,
    ) -> Result<SubscriptionId> {
        let query_path = query_path.to_string();
        self.connection
            .call(|result_tx| ConnCmd::Subscribe {
                query_path,
                args,
                options,
                handlers,
                result_tx,
            })
            .await?
    }

    /// Complete a subscription. `false` if it was unknown or already completed.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        self.connection
            .call(|result_tx| ConnCmd::Unsubscribe {
                id,
                result_tx: Some(result_tx),
            })
            .await
    }

    /// Point a subscription at new arguments.
    pub async fn update_args(&self, id: SubscriptionId, args: Option<Value>) -> Result<bool> {
        self.connection
            .call(|result_tx| ConnCmd::UpdateArgs { id, args, result_tx })
            .await?
    }

    pub async fn pause(&self, id: SubscriptionId) -> Result<bool> {
        self.connection.call(|result_tx| ConnCmd::Pause { id, result_tx }).await
    }

    pub async fn resume(&self, id: SubscriptionId) -> Result<bool> {
        self.connection.call(|result_tx| ConnCmd::Resume { id, result_tx }).await
    }

    /// Snapshot of one subscription.
    pub async fn subscription(&self, id: SubscriptionId) -> Result<Option<SubscriptionInfo>> {
        self.connection
            .call(|result_tx| ConnCmd::GetSubscription { id, result_tx })
            .await
    }

    /// Snapshots of every live subscription, oldest first.
    pub async fn list_subscriptions(&self) -> Result<Vec<SubscriptionInfo>> {
        self.connection
            .call(|result_tx| ConnCmd::ListSubscriptions { result_tx })
            .await
    }

    /// Replace the token. Sent immediately when connected, and on every
    /// later open.
    pub async fn set_auth(&self, token: impl Into<String>) -> Result<()> {
        self.connection.notify(ConnCmd::SetAuth { token: token.into() }).await
    }

    /// Forget the token. The current connection is left as is.
    pub async fn clear_auth(&self) -> Result<()> {
        self.connection.notify(ConnCmd::ClearAuth).await
    }

    /// Run a mutation over the socket. Fails with `NotConnected` when the
    /// connection is not open and `ServerError` when the server reports failure.
    pub async fn mutation(&self, path: &str, args: Value) -> Result<Value> {
        self.request(RequestKind::Mutation, path, args).await
    }

    /// Run an action over the socket. Same failure modes as [`mutation`](Self::mutation).
    pub async fn action(&self, path: &str, args: Value) -> Result<Value> {
        self.request(RequestKind::Action, path, args).await
    }

    async fn request(&self, kind: RequestKind, path: &str, args: Value) -> Result<Value> {
        let path = path.to_string();
        self.connection
            .call(|result_tx| ConnCmd::Request {
                kind,
                path,
                args,
                result_tx,
            })
            .await?
    }

    /// Connect again after the reconnect budget ran out, or skip the
    /// remaining backoff delay. No effect while open or connecting.
    pub async fn reconnect(&self) -> Result<()> {
        self.connection.notify(ConnCmd::Reconnect).await
    }

    /// Close the connection and complete every subscription. Terminal and
    /// idempotent; later subscribe calls fail with `Disposed`.
    pub async fn close(&self) -> Result<()> {
        match self.connection.call(|result_tx| ConnCmd::Shutdown { result_tx }).await {
            Ok(()) => Ok(()),
            // Task already gone: nothing left to close.
            Err(SyncLinkError::SubscriptionError { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Builder for configuring [`SyncLinkClient`] instances.
pub struct SyncLinkClientBuilder {
    base_url: Option<String>,
    auth: AuthProvider,
    timeouts: SyncLinkTimeouts,
    connection_options: ConnectionOptions,
    registry_config: RegistryConfig,
    event_handlers: EventHandlers,
}

impl SyncLinkClientBuilder {
    fn new() -> Self {
        Self {
            base_url: None,
            auth: AuthProvider::none(),
            timeouts: SyncLinkTimeouts::default(),
            connection_options: ConnectionOptions::default(),
            registry_config: RegistryConfig::default(),
            event_handlers: EventHandlers::default(),
        }
    }

    /// Set the HTTP(S) base URL of the server
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set JWT token authentication
    pub fn jwt_token(mut self, token: impl Into<String>) -> Self {
        self.auth = AuthProvider::jwt_token(token.into());
        self
    }

    /// Set authentication provider directly
    pub fn auth(mut self, auth: AuthProvider) -> Self {
        self.auth = auth;
        self
    }

    /// Set timeout and keep-alive configuration
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use synclink::{SyncLinkClient, SyncLinkTimeouts};
    ///
    /// # async fn example() -> synclink::Result<()> {
    /// let client = SyncLinkClient::builder()
    ///     .base_url("http://localhost:3000")
    ///     .timeouts(SyncLinkTimeouts::fast())
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn timeouts(mut self, timeouts: SyncLinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set reconnection behavior and the sync endpoint path
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use synclink::{SyncLinkClient, ConnectionOptions};
    ///
    /// # async fn example() -> synclink::Result<()> {
    /// let client = SyncLinkClient::builder()
    ///     .base_url("http://localhost:3000")
    ///     .connection_options(
    ///         ConnectionOptions::new()
    ///             .with_max_reconnect_attempts(5)
    ///             .with_fail_subscriptions_on_give_up(true)
    ///     )
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.connection_options = options;
        self
    }

    /// Set deduplication, limits and pause queueing
    pub fn registry_config(mut self, config: RegistryConfig) -> Self {
        self.registry_config = config;
        self
    }

    /// Set connection lifecycle callbacks
    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.event_handlers = handlers;
        self
    }

    /// Build the client and start connecting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<SyncLinkClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| SyncLinkError::ConfigurationError("base_url is required".into()))?;
        let ws_url = resolve_ws_url(&base_url, &self.connection_options.sync_path)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            SyncLinkError::ConfigurationError(
                "SyncLinkClient must be built inside a tokio runtime".into(),
            )
        })?;

        log::debug!("[synclink] Building client for {}", ws_url);
        let connection = SharedConnection::spawn(
            &runtime,
            ConnectionConfig {
                ws_url: ws_url.clone(),
                auth: self.auth,
                options: self.connection_options,
                timeouts: self.timeouts.clone(),
                registry: self.registry_config,
                event_handlers: self.event_handlers,
            },
        );

        Ok(SyncLinkClient {
            ws_url,
            timeouts: self.timeouts,
            connection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_base_url() {
        let err = SyncLinkClient::builder().build().unwrap_err();
        assert_eq!(err, SyncLinkError::ConfigurationError("base_url is required".into()));
    }

    #[test]
    fn test_build_requires_runtime() {
        let err = SyncLinkClient::builder()
            .base_url("http://localhost:3000")
            .build()
            .unwrap_err();
        assert!(matches!(err, SyncLinkError::ConfigurationError(ref m) if m.contains("tokio runtime")));
    }

    #[test]
    fn test_build_rejects_invalid_url() {
        let err = SyncLinkClient::builder()
            .base_url("ftp://localhost")
            .build()
            .unwrap_err();
        assert!(matches!(err, SyncLinkError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn test_build_resolves_endpoint() {
        let client = SyncLinkClient::builder()
            .base_url("https://example.invalid")
            .connection_options(ConnectionOptions::new().with_auto_reconnect(false))
            .build()
            .unwrap();
        assert_eq!(client.ws_url(), "wss://example.invalid/api/sync");
        client.close().await.unwrap();
        client.close().await.unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_requests_rejected_when_not_connected() {
        let client = SyncLinkClient::builder()
            .base_url("http://127.0.0.1:9")
            .connection_options(ConnectionOptions::new().with_auto_reconnect(false))
            .build()
            .unwrap();
        let err = client.mutation("m:send", Value::Null).await.unwrap_err();
        assert_eq!(err, SyncLinkError::NotConnected);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_after_close_is_disposed() {
        let client = SyncLinkClient::builder()
            .base_url("http://127.0.0.1:9")
            .connection_options(ConnectionOptions::new().with_auto_reconnect(false))
            .build()
            .unwrap();
        client.close().await.unwrap();
        let err = client.subscribe("q", None).await.unwrap_err();
        assert_eq!(err.subscription_code(), Some(crate::error::SubscriptionErrorCode::Disposed));
    }
}
