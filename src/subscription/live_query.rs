//! `LiveQuery`: consumer handle for one subscription.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::handlers::SubscriptionHandlers;
use crate::codec::Value;
use crate::connection::ConnCmd;
use crate::error::{Result, SubscriptionErrorCode, SyncLinkError};
use crate::models::{RemoteError, SubscriptionId};

/// Something that happened to a live query.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// New result. Shared with every handle on the same query.
    Update(Arc<Value>),
    /// The server reported an error for the query.
    Error(RemoteError),
    /// The connection dropped; the query will be resubscribed on reconnect.
    Disconnected,
    /// The subscription ended. No further events follow.
    Complete,
}

/// Handlers that forward every callback into an event channel.
pub(crate) fn channel_handlers() -> (SubscriptionHandlers, mpsc::UnboundedReceiver<SubscriptionEvent>) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let update_tx = event_tx.clone();
    let error_tx = event_tx.clone();
    let disconnect_tx = event_tx.clone();
    let handlers = SubscriptionHandlers::new()
        .on_update(move |value| {
            let _ = update_tx.send(SubscriptionEvent::Update(value));
        })
        .on_error(move |error| {
            let _ = error_tx.send(SubscriptionEvent::Error(error));
        })
        .on_disconnect(move || {
            let _ = disconnect_tx.send(SubscriptionEvent::Disconnected);
        })
        .on_complete(move |_| {
            let _ = event_tx.send(SubscriptionEvent::Complete);
        });
    (handlers, event_rx)
}

/// A live query subscription.
///
/// # Examples
///
/// ```rust,no_run
/// use synclink::{SubscriptionEvent, SyncLinkClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = SyncLinkClient::builder()
///     .base_url("http://localhost:3000")
///     .build()?;
///
/// let mut messages = client.subscribe("messages:list", None).await?;
///
/// while let Some(event) = messages.next().await {
///     match event {
///         SubscriptionEvent::Update(rows) => println!("rows: {:?}", rows),
///         SubscriptionEvent::Error(e) => eprintln!("query failed: {}", e),
///         SubscriptionEvent::Disconnected => println!("offline"),
///         SubscriptionEvent::Complete => break,
///     }
/// }
/// # Ok(())
/// # }
/// ```
///
/// Dropping a `LiveQuery` unsubscribes in the background.
pub struct LiveQuery {
    id: SubscriptionId,
    event_rx: mpsc::UnboundedReceiver<SubscriptionEvent>,
    cmd_tx: mpsc::Sender<ConnCmd>,
    closed: bool,
}

impl std::fmt::Debug for LiveQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveQuery")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}

impl LiveQuery {
    pub(crate) fn new(
        id: SubscriptionId,
        event_rx: mpsc::UnboundedReceiver<SubscriptionEvent>,
        cmd_tx: mpsc::Sender<ConnCmd>,
    ) -> Self {
        Self {
            id,
            event_rx,
            cmd_tx,
            closed: false,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next event, or `None` once the subscription has completed and all
    /// buffered events were consumed.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        self.event_rx.recv().await
    }

    /// Unsubscribe and wait for the registry to confirm. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let id = self.id;
        let (result_tx, result_rx) = oneshot::channel();
        let closed_err = || {
            SyncLinkError::subscription(
                SubscriptionErrorCode::ConnectionClosed,
                "connection task is not running",
                Some(id),
            )
        };
        self.cmd_tx
            .send(ConnCmd::Unsubscribe {
                id,
                result_tx: Some(result_tx),
            })
            .await
            .map_err(|_| closed_err())?;
        // `false` means the handle was already completed, which is fine here.
        result_rx.await.map_err(|_| closed_err())?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for LiveQuery {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.cmd_tx.try_send(ConnCmd::Unsubscribe {
            id: self.id,
            result_tx: None,
        }) {
            log::debug!("[synclink] Could not unsubscribe {} on drop: {}", self.id, e);
        }
    }
}
