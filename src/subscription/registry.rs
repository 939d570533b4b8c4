//! Subscription registry: dedup, reference counting, result cache and
//! per-handle status.
//!
//! The registry is a plain state container. It never touches the network;
//! protocol messages it wants sent are queued and drained with
//! [`SubscriptionRegistry::take_outbound`]. While offline nothing is
//! queued, because [`SubscriptionRegistry::handle_reconnect`] replays every
//! live query anyway.
//!
//! Each distinct query is one *entry*, identified on the wire by its
//! `subscriptionId` (`q1`, `q2`, ...). With deduplication on, handles whose
//! `(query_path, args)` fingerprints match join the same entry; the entry's
//! reference count is its number of live member handles, and at zero the
//! entry and its cache are dropped and an `unsubscribe` is queued.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::fingerprint::query_fingerprint;
use super::handlers::SubscriptionHandlers;
use crate::codec::{Value, WireMessage};
use crate::error::{Result, SubscriptionErrorCode, SyncLinkError};
use crate::models::{
    RegistryConfig, RemoteError, SubscriptionId, SubscriptionInfo, SubscriptionOptions,
    SubscriptionStatus,
};

/// Current time in millis since Unix epoch.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

struct Handle {
    info: SubscriptionInfo,
    entry_id: String,
    skip_initial_callback: bool,
    queue_while_paused: bool,
    paused_updates: Vec<Arc<Value>>,
    handlers: SubscriptionHandlers,
}

struct QueryEntry {
    seq: u64,
    fingerprint: String,
    query_path: String,
    args: Option<Value>,
    members: BTreeSet<SubscriptionId>,
    cache: Option<Arc<Value>>,
}

impl QueryEntry {
    fn subscribe_message(&self, entry_id: &str) -> WireMessage {
        WireMessage::Subscribe {
            subscription_id: entry_id.to_string(),
            query_path: self.query_path.clone(),
            args: wire_args(self.args.as_ref()),
        }
    }
}

fn wire_args(args: Option<&Value>) -> Value {
    match args {
        None | Some(Value::Undefined) => Value::Object(Default::default()),
        Some(value) => value.clone(),
    }
}

/// Tracks application subscriptions and the shared queries behind them.
pub struct SubscriptionRegistry {
    config: RegistryConfig,
    handles: HashMap<SubscriptionId, Handle>,
    entries: HashMap<String, QueryEntry>,
    by_fingerprint: HashMap<String, String>,
    next_handle: u64,
    next_entry: u64,
    online: bool,
    disposed: bool,
    outbox: Vec<WireMessage>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("handles", &self.handles.len())
            .field("entries", &self.entries.len())
            .field("online", &self.online)
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl SubscriptionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            handles: HashMap::new(),
            entries: HashMap::new(),
            by_fingerprint: HashMap::new(),
            next_handle: 1,
            next_entry: 1,
            online: false,
            disposed: false,
            outbox: Vec::new(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Whether `subscribe`/`unsubscribe` messages are currently queued.
    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Number of live (non-completed) handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Number of distinct server-side queries.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Reference count of the entry a pair of `(query_path, args)` maps to.
    /// With deduplication off, the count summed over all matching entries.
    pub fn ref_count(&self, query_path: &str, args: Option<&Value>) -> Result<usize> {
        let fingerprint = query_fingerprint(query_path, args)?;
        Ok(self
            .entries
            .values()
            .filter(|e| e.fingerprint == fingerprint)
            .map(|e| e.members.len())
            .sum())
    }

    /// Cached result of an entry, shared by all its handles.
    pub fn cached(&self, query_path: &str, args: Option<&Value>) -> Result<Option<Arc<Value>>> {
        let fingerprint = query_fingerprint(query_path, args)?;
        Ok(self
            .entries
            .values()
            .find(|e| e.fingerprint == fingerprint)
            .and_then(|e| e.cache.clone()))
    }

    /// Wire `subscriptionId` of the entry behind a handle.
    pub fn query_id(&self, id: SubscriptionId) -> Option<&str> {
        self.handles.get(&id).map(|h| h.entry_id.as_str())
    }

    pub fn subscription(&self, id: SubscriptionId) -> Option<SubscriptionInfo> {
        self.handles.get(&id).map(|h| h.info.clone())
    }

    /// Snapshots of every live handle, oldest first.
    pub fn list(&self) -> Vec<SubscriptionInfo> {
        let mut infos: Vec<SubscriptionInfo> = self.handles.values().map(|h| h.info.clone()).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Drain the protocol messages queued since the last call.
    pub fn take_outbound(&mut self) -> Vec<WireMessage> {
        std::mem::take(&mut self.outbox)
    }

    // ---------------------------------------------------------------
    // Application operations
    // ---------------------------------------------------------------

    /// Create a handle for `query_path(args)`.
    ///
    /// Joins an existing entry when deduplication is on and the fingerprint
    /// matches, delivering its cached result right away unless
    /// `skip_initial_callback` is set. Otherwise creates a new entry and,
    /// if online, queues a `subscribe`.
    pub fn create_subscription(
        &mut self,
        query_path: &str,
        args: Option<Value>,
        options: SubscriptionOptions,
        handlers: SubscriptionHandlers,
    ) -> Result<SubscriptionId> {
        if self.disposed {
            return Err(SyncLinkError::subscription(
                SubscriptionErrorCode::Disposed,
                "subscription registry has been disposed",
                None,
            ));
        }
        if let Some(max) = self.config.max_subscriptions {
            if self.handles.len() >= max {
                return Err(SyncLinkError::subscription(
                    SubscriptionErrorCode::LimitExceeded,
                    format!("maximum of {} subscriptions reached", max),
                    None,
                ));
            }
        }
        let fingerprint = query_fingerprint(query_path, args.as_ref())?;

        let id = SubscriptionId::new(self.next_handle);
        self.next_handle += 1;
        let now = now_ms();
        let handle = Handle {
            info: SubscriptionInfo {
                id,
                query_path: query_path.to_string(),
                args,
                status: SubscriptionStatus::Pending,
                data: None,
                error: None,
                error_count: 0,
                update_count: 0,
                created_at_ms: now,
                updated_at_ms: now,
                priority: options.priority,
            },
            entry_id: String::new(),
            skip_initial_callback: options.skip_initial_callback,
            queue_while_paused: options
                .queue_updates_while_paused
                .unwrap_or(self.config.queue_updates_while_paused),
            paused_updates: Vec::new(),
            handlers,
        };
        self.handles.insert(id, handle);
        self.attach(id, fingerprint);

        log::debug!("[synclink] Created subscription {} for '{}'", id, query_path);
        Ok(id)
    }

    /// Complete a handle. Returns `false` for unknown or already completed ids.
    pub fn remove_subscription(&mut self, id: SubscriptionId) -> bool {
        let Some(mut handle) = self.handles.remove(&id) else {
            return false;
        };
        self.detach(id, &handle.entry_id);
        handle.info.status = SubscriptionStatus::Completed;
        handle.info.updated_at_ms = now_ms();
        handle.paused_updates.clear();
        log::debug!("[synclink] Removed subscription {}", id);
        handle.handlers.emit_complete(handle.info);
        true
    }

    /// Move a handle to new arguments. The handle goes back to pending with
    /// no data and leaves its old entry as if removed, then joins the entry
    /// for the new fingerprint as if created.
    pub fn update_subscription(&mut self, id: SubscriptionId, args: Option<Value>) -> Result<bool> {
        let Some(handle) = self.handles.get(&id) else {
            return Ok(false);
        };
        let fingerprint = query_fingerprint(&handle.info.query_path, args.as_ref())?;
        let old_entry = handle.entry_id.clone();
        self.detach(id, &old_entry);

        if let Some(handle) = self.handles.get_mut(&id) {
            handle.info.args = args;
            handle.info.status = SubscriptionStatus::Pending;
            handle.info.data = None;
            handle.info.error = None;
            handle.info.updated_at_ms = now_ms();
            handle.paused_updates.clear();
        }
        self.attach(id, fingerprint);
        Ok(true)
    }

    /// Stop delivering updates to a handle. Its cached data is kept.
    ///
    /// Only `Active` and `Pending` handles can be paused; a handle in
    /// `Error` stays there until the next update clears it.
    pub fn pause_subscription(&mut self, id: SubscriptionId) -> bool {
        let Some(handle) = self.handles.get_mut(&id) else {
            return false;
        };
        if !matches!(handle.info.status, SubscriptionStatus::Active | SubscriptionStatus::Pending) {
            return false;
        }
        handle.info.status = SubscriptionStatus::Paused;
        handle.info.updated_at_ms = now_ms();
        true
    }

    /// Resume a paused handle, replaying queued updates in arrival order.
    pub fn resume_subscription(&mut self, id: SubscriptionId) -> bool {
        let Some(handle) = self.handles.get_mut(&id) else {
            return false;
        };
        if handle.info.status != SubscriptionStatus::Paused {
            return false;
        }
        handle.info.status = if handle.info.data.is_some() {
            SubscriptionStatus::Active
        } else {
            SubscriptionStatus::Pending
        };
        handle.info.updated_at_ms = now_ms();
        for value in std::mem::take(&mut handle.paused_updates) {
            deliver(handle, value);
        }
        true
    }

    /// Complete every handle and reject further creation. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        let mut ids: Vec<SubscriptionId> = self.handles.keys().copied().collect();
        ids.sort();
        for id in ids {
            self.remove_subscription(id);
        }
        self.entries.clear();
        self.by_fingerprint.clear();
        self.outbox.clear();
    }

    // ---------------------------------------------------------------
    // Protocol events
    // ---------------------------------------------------------------

    /// Deliver a result to one handle. The entry's cache is updated too.
    pub fn handle_update(&mut self, id: SubscriptionId, value: Value) -> bool {
        let Some(entry_id) = self.handles.get(&id).map(|h| h.entry_id.clone()) else {
            return false;
        };
        let value = Arc::new(value);
        if let Some(entry) = self.entries.get_mut(&entry_id) {
            entry.cache = Some(value.clone());
        }
        if let Some(handle) = self.handles.get_mut(&id) {
            deliver(handle, value);
        }
        true
    }

    /// Fan a result out to every handle whose `(query_path, args)` matches.
    /// Returns the number of handles reached.
    pub fn handle_query_update(
        &mut self,
        query_path: &str,
        args: Option<&Value>,
        value: Value,
    ) -> Result<usize> {
        let fingerprint = query_fingerprint(query_path, args)?;
        let entry_ids: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.fingerprint == fingerprint)
            .map(|(k, _)| k.clone())
            .collect();
        let value = Arc::new(value);
        Ok(entry_ids
            .iter()
            .map(|entry_id| self.update_entry(entry_id, value.clone()))
            .sum())
    }

    /// Route a result addressed by wire `subscriptionId`. Returns `false`
    /// for ids with no live entry (for example a late update after
    /// unsubscribing).
    pub fn handle_remote_update(&mut self, query_id: &str, value: Value) -> bool {
        if !self.entries.contains_key(query_id) {
            return false;
        }
        self.update_entry(query_id, Arc::new(value));
        true
    }

    /// Record an error on one handle. Cached data is untouched.
    pub fn handle_error(&mut self, id: SubscriptionId, error: RemoteError) -> bool {
        match self.handles.get_mut(&id) {
            Some(handle) => {
                record_error(handle, error);
                true
            },
            None => false,
        }
    }

    /// Record an error on every handle of the entry with this wire id.
    pub fn handle_remote_error(&mut self, query_id: &str, error: RemoteError) -> bool {
        let Some(members) = self.entries.get(query_id).map(|e| e.members.clone()) else {
            return false;
        };
        for id in members {
            if let Some(handle) = self.handles.get_mut(&id) {
                record_error(handle, error.clone());
            }
        }
        true
    }

    /// Record the same error on every live handle.
    pub fn fail_all(&mut self, error: RemoteError) {
        let mut ids: Vec<SubscriptionId> = self.handles.keys().copied().collect();
        ids.sort();
        for id in ids {
            self.handle_error(id, error.clone());
        }
    }

    /// The transport is gone. Handles go back to pending (paused ones stay
    /// paused), caches and entries are kept for resubscription, and queued
    /// messages for the dead transport are discarded.
    pub fn handle_disconnect(&mut self) {
        self.online = false;
        self.outbox.clear();
        let mut ids: Vec<SubscriptionId> = self.handles.keys().copied().collect();
        ids.sort();
        for id in ids {
            if let Some(handle) = self.handles.get_mut(&id) {
                if matches!(handle.info.status, SubscriptionStatus::Active | SubscriptionStatus::Error) {
                    handle.info.status = SubscriptionStatus::Pending;
                    handle.info.updated_at_ms = now_ms();
                }
                handle.handlers.emit_disconnect();
            }
        }
    }

    /// A fresh transport is open. Returns one `subscribe` per live entry,
    /// in creation order, and starts queueing messages again.
    pub fn handle_reconnect(&mut self) -> Vec<WireMessage> {
        if self.disposed {
            return Vec::new();
        }
        self.online = true;
        self.outbox.clear();
        self.ordered_entries()
            .into_iter()
            .map(|(entry_id, entry)| entry.subscribe_message(entry_id))
            .collect()
    }

    /// Distinct `(query_path, args)` pairs that must be subscribed again.
    pub fn get_pending_resubscriptions(&self) -> Vec<(String, Option<Value>)> {
        self.ordered_entries()
            .into_iter()
            .map(|(_, entry)| (entry.query_path.clone(), entry.args.clone()))
            .collect()
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn ordered_entries(&self) -> Vec<(&String, &QueryEntry)> {
        let mut entries: Vec<(&String, &QueryEntry)> = self.entries.iter().collect();
        entries.sort_by_key(|(_, e)| e.seq);
        entries
    }

    fn attach(&mut self, id: SubscriptionId, fingerprint: String) {
        let existing = if self.config.deduplicate {
            self.by_fingerprint.get(&fingerprint).cloned()
        } else {
            None
        };

        let entry_id = match existing {
            Some(entry_id) => {
                let cached = self.entries.get_mut(&entry_id).and_then(|entry| {
                    entry.members.insert(id);
                    entry.cache.clone()
                });
                if let Some(handle) = self.handles.get_mut(&id) {
                    handle.entry_id = entry_id.clone();
                    if let Some(value) = cached {
                        if !handle.skip_initial_callback {
                            deliver(handle, value);
                        }
                    }
                }
                entry_id
            },
            None => {
                let seq = self.next_entry;
                self.next_entry += 1;
                let entry_id = format!("q{}", seq);
                let (query_path, args) = match self.handles.get_mut(&id) {
                    Some(handle) => {
                        handle.entry_id = entry_id.clone();
                        (handle.info.query_path.clone(), handle.info.args.clone())
                    },
                    None => return,
                };
                let entry = QueryEntry {
                    seq,
                    fingerprint: fingerprint.clone(),
                    query_path,
                    args,
                    members: BTreeSet::from([id]),
                    cache: None,
                };
                if self.online {
                    self.outbox.push(entry.subscribe_message(&entry_id));
                }
                self.entries.insert(entry_id.clone(), entry);
                if self.config.deduplicate {
                    self.by_fingerprint.insert(fingerprint, entry_id.clone());
                }
                entry_id
            },
        };
        log::trace!("[synclink] Subscription {} attached to {}", id, entry_id);
    }

    fn detach(&mut self, id: SubscriptionId, entry_id: &str) {
        let Some(entry) = self.entries.get_mut(entry_id) else {
            return;
        };
        entry.members.remove(&id);
        if !entry.members.is_empty() {
            return;
        }
        if let Some(entry) = self.entries.remove(entry_id) {
            if self.by_fingerprint.get(&entry.fingerprint).map(String::as_str) == Some(entry_id) {
                self.by_fingerprint.remove(&entry.fingerprint);
            }
            if self.online {
                self.outbox.push(WireMessage::Unsubscribe {
                    subscription_id: entry_id.to_string(),
                });
            }
            log::debug!("[synclink] Dropped query {} ({})", entry_id, entry.query_path);
        }
    }

    fn update_entry(&mut self, entry_id: &str, value: Arc<Value>) -> usize {
        let Some(entry) = self.entries.get_mut(entry_id) else {
            return 0;
        };
        entry.cache = Some(value.clone());
        let members = entry.members.clone();
        let mut reached = 0;
        for id in members {
            if let Some(handle) = self.handles.get_mut(&id) {
                deliver(handle, value.clone());
                reached += 1;
            }
        }
        reached
    }
}

/// Apply one result to a handle, or queue/drop it when paused.
fn deliver(handle: &mut Handle, value: Arc<Value>) {
    match handle.info.status {
        SubscriptionStatus::Completed => {},
        SubscriptionStatus::Paused => {
            if handle.queue_while_paused {
                handle.paused_updates.push(value);
            }
        },
        SubscriptionStatus::Pending | SubscriptionStatus::Active | SubscriptionStatus::Error => {
            handle.info.data = Some(value.clone());
            handle.info.status = SubscriptionStatus::Active;
            handle.info.error = None;
            handle.info.error_count = 0;
            handle.info.update_count += 1;
            handle.info.updated_at_ms = now_ms();
            handle.handlers.emit_update(value);
        },
    }
}

/// Paused handles keep their status but still record and report the error.
fn record_error(handle: &mut Handle, error: RemoteError) {
    if handle.info.status == SubscriptionStatus::Completed {
        return;
    }
    if handle.info.status != SubscriptionStatus::Paused {
        handle.info.status = SubscriptionStatus::Error;
    }
    handle.info.error = Some(error.clone());
    handle.info.error_count += 1;
    handle.info.updated_at_ms = now_ms();
    handle.handlers.emit_error(error);
}
