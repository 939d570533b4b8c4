//! Per-subscription callbacks.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::codec::Value;
use crate::models::{RemoteError, SubscriptionInfo};

pub type OnUpdateCallback = Arc<dyn Fn(Arc<Value>) + Send + Sync>;
pub type OnSubscriptionErrorCallback = Arc<dyn Fn(RemoteError) + Send + Sync>;
pub type OnCompleteCallback = Arc<dyn Fn(SubscriptionInfo) + Send + Sync>;
pub type OnSubscriptionDisconnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Callbacks attached to one subscription handle. All optional.
///
/// A panicking callback is caught and logged; delivery to the other
/// handles sharing the query continues.
///
/// ```rust
/// use synclink::SubscriptionHandlers;
///
/// let handlers = SubscriptionHandlers::new()
///     .on_update(|value| println!("rows: {:?}", value))
///     .on_error(|err| eprintln!("query failed: {}", err));
/// ```
#[derive(Clone, Default)]
pub struct SubscriptionHandlers {
    on_update: Option<OnUpdateCallback>,
    on_error: Option<OnSubscriptionErrorCallback>,
    on_complete: Option<OnCompleteCallback>,
    on_disconnect: Option<OnSubscriptionDisconnectCallback>,
}

impl fmt::Debug for SubscriptionHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandlers")
            .field("on_update", &self.on_update.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .finish()
    }
}

impl SubscriptionHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// New result for the query. The value is shared with every handle on
    /// the same query.
    pub fn on_update(mut self, f: impl Fn(Arc<Value>) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(RemoteError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Called exactly once with the final snapshot when the handle completes.
    pub fn on_complete(mut self, f: impl Fn(SubscriptionInfo) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    /// Connection lost; the handle is back to pending until resubscribed.
    pub fn on_disconnect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    pub(crate) fn emit_update(&self, value: Arc<Value>) {
        if let Some(cb) = &self.on_update {
            guarded("on_update", || cb(value));
        }
    }

    pub(crate) fn emit_error(&self, error: RemoteError) {
        if let Some(cb) = &self.on_error {
            guarded("on_error", || cb(error));
        }
    }

    pub(crate) fn emit_complete(&self, info: SubscriptionInfo) {
        if let Some(cb) = &self.on_complete {
            guarded("on_complete", || cb(info));
        }
    }

    pub(crate) fn emit_disconnect(&self) {
        if let Some(cb) = &self.on_disconnect {
            guarded("on_disconnect", || cb());
        }
    }
}

fn guarded(name: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        log::warn!("[synclink] Subscription {} handler panicked; continuing", name);
    }
}
