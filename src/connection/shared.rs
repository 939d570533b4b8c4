//! Background connection task.
//!
//! One tokio task owns the WebSocket, the [`SubscriptionRegistry`] and all
//! timers. It turns socket, timer and command events into
//! [`ConnInput`]s for the [`ConnectionMachine`] and executes the
//! [`ConnAction`]s it returns. Public API calls reach the task as
//! [`ConnCmd`]s with a oneshot reply channel, so the registry and the
//! machine are only ever touched from this task.

use std::collections::{HashMap, VecDeque};
use std::future::{pending, Future};
use std::pin::Pin;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::tungstenite::{error::Error as WsError, protocol::Message};

use super::machine::{ConnAction, ConnInput, ConnectionMachine, ConnectionState};
use super::websocket::{connect, decode_frame, InboundFrame, WebSocketStream};
use crate::auth::AuthProvider;
use crate::codec::{encode_message, ModificationKind, RequestKind, Value, WireMessage};
use crate::error::{Result, SubscriptionErrorCode, SyncLinkError};
use crate::event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
use crate::models::{
    ConnectionOptions, RegistryConfig, RemoteError, SubscriptionId, SubscriptionInfo,
    SubscriptionOptions,
};
use crate::subscription::{SubscriptionHandlers, SubscriptionRegistry};
use crate::timeouts::SyncLinkTimeouts;

/// Bounded wait for the close handshake on a transport we are discarding.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

const COMMAND_CHANNEL_CAPACITY: usize = 256;

// ── Commands ────────────────────────────────────────────────────────────────

/// Commands sent from the public API to the background connection task.
pub(crate) enum ConnCmd {
    Subscribe {
        query_path: String,
        args: Option<Value>,
        options: SubscriptionOptions,
        handlers: SubscriptionHandlers,
        result_tx: oneshot::Sender<Result<SubscriptionId>>,
    },
    /// `result_tx` is `None` for fire-and-forget unsubscribes from `Drop`.
    Unsubscribe {
        id: SubscriptionId,
        result_tx: Option<oneshot::Sender<bool>>,
    },
    UpdateArgs {
        id: SubscriptionId,
        args: Option<Value>,
        result_tx: oneshot::Sender<Result<bool>>,
    },
    Pause {
        id: SubscriptionId,
        result_tx: oneshot::Sender<bool>,
    },
    Resume {
        id: SubscriptionId,
        result_tx: oneshot::Sender<bool>,
    },
    GetSubscription {
        id: SubscriptionId,
        result_tx: oneshot::Sender<Option<SubscriptionInfo>>,
    },
    ListSubscriptions {
        result_tx: oneshot::Sender<Vec<SubscriptionInfo>>,
    },
    SetAuth {
        token: String,
    },
    ClearAuth,
    Request {
        kind: RequestKind,
        path: String,
        args: Value,
        result_tx: oneshot::Sender<Result<Value>>,
    },
    Reconnect,
    Shutdown {
        result_tx: oneshot::Sender<()>,
    },
}

struct PendingRequest {
    kind: RequestKind,
    path: String,
    deadline: Option<TokioInstant>,
    result_tx: oneshot::Sender<Result<Value>>,
}

// ── SharedConnection (public handle) ────────────────────────────────────────

/// Handle to the background connection task. Cloning shares the task.
#[derive(Clone)]
pub(crate) struct SharedConnection {
    cmd_tx: mpsc::Sender<ConnCmd>,
    state_rx: watch::Receiver<ConnectionState>,
}

pub(crate) struct ConnectionConfig {
    pub ws_url: String,
    pub auth: AuthProvider,
    pub options: ConnectionOptions,
    pub timeouts: SyncLinkTimeouts,
    pub registry: RegistryConfig,
    pub event_handlers: EventHandlers,
}

fn task_stopped() -> SyncLinkError {
    SyncLinkError::subscription(
        SubscriptionErrorCode::ConnectionClosed,
        "connection task is not running",
        None,
    )
}

impl SharedConnection {
    /// Spawn the connection task on `runtime`. It starts connecting at once.
    pub(crate) fn spawn(runtime: &tokio::runtime::Handle, config: ConnectionConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel::<ConnCmd>(COMMAND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let driver = ConnectionDriver {
            machine: ConnectionMachine::new(config.options, &config.timeouts, config.auth),
            registry: SubscriptionRegistry::new(config.registry),
            ws_url: config.ws_url,
            timeouts: config.timeouts,
            event_handlers: config.event_handlers,
            cmd_rx,
            state_tx,
            ws: None,
            connecting: None,
            ping_at: None,
            pong_at: None,
            reconnect_at: None,
            requests: HashMap::new(),
            next_request_id: 1,
        };
        runtime.spawn(driver.run());

        Self { cmd_tx, state_rx }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub(crate) fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub(crate) fn command_sender(&self) -> mpsc::Sender<ConnCmd> {
        self.cmd_tx.clone()
    }

    /// Send a command and wait for its reply.
    pub(crate) async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> ConnCmd) -> Result<T> {
        let (result_tx, result_rx) = oneshot::channel();
        self.cmd_tx.send(make(result_tx)).await.map_err(|_| task_stopped())?;
        result_rx.await.map_err(|_| task_stopped())
    }

    /// Send a command that has no reply.
    pub(crate) async fn notify(&self, cmd: ConnCmd) -> Result<()> {
        self.cmd_tx.send(cmd).await.map_err(|_| task_stopped())
    }
}

// ── Driver ──────────────────────────────────────────────────────────────────

type ConnectFuture = Pin<Box<dyn Future<Output = (u64, Result<WebSocketStream>)> + Send>>;

struct ConnectionDriver {
    machine: ConnectionMachine,
    registry: SubscriptionRegistry,
    ws_url: String,
    timeouts: SyncLinkTimeouts,
    event_handlers: EventHandlers,
    cmd_rx: mpsc::Receiver<ConnCmd>,
    state_tx: watch::Sender<ConnectionState>,
    ws: Option<WebSocketStream>,
    connecting: Option<ConnectFuture>,
    ping_at: Option<TokioInstant>,
    pong_at: Option<TokioInstant>,
    reconnect_at: Option<TokioInstant>,
    requests: HashMap<String, PendingRequest>,
    next_request_id: u64,
}

async fn sleep_until_opt(deadline: Option<TokioInstant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn poll_connecting(connecting: &mut Option<ConnectFuture>) -> (u64, Result<WebSocketStream>) {
    match connecting {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn read_frame(
    ws: &mut Option<WebSocketStream>,
) -> Option<std::result::Result<Message, WsError>> {
    match ws {
        Some(stream) => stream.next().await,
        None => pending().await,
    }
}

impl ConnectionDriver {
    async fn run(mut self) {
        self.apply(ConnInput::Start).await;

        loop {
            let ping_at = self.ping_at;
            let pong_at = self.pong_at;
            let reconnect_at = self.reconnect_at;
            let request_deadline = self.requests.values().filter_map(|r| r.deadline).min();

            tokio::select! {
                biased;

                _ = sleep_until_opt(pong_at) => {
                    self.pong_at = None;
                    log::warn!(
                        "[synclink] Pong timeout ({:?}); presuming connection dead",
                        self.timeouts.pong_timeout,
                    );
                    self.apply(ConnInput::PongTimeout).await;
                }

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            self.apply(ConnInput::Close).await;
                            break;
                        },
                    }
                }

                opened = poll_connecting(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_result(opened).await;
                }

                frame = read_frame(&mut self.ws) => {
                    self.on_frame(frame).await;
                }

                _ = sleep_until_opt(ping_at) => {
                    self.ping_at = None;
                    self.apply(ConnInput::PingDue).await;
                }

                _ = sleep_until_opt(reconnect_at) => {
                    self.reconnect_at = None;
                    self.apply(ConnInput::ReconnectDue).await;
                }

                _ = sleep_until_opt(request_deadline) => {
                    self.expire_requests();
                }
            }

            self.flush_outbound().await;
        }

        log::debug!("[synclink] Connection task stopped");
    }

    /// Feed one input to the machine, execute its actions, and keep going
    /// with any inputs those actions produce (e.g. a send failing).
    async fn apply(&mut self, input: ConnInput) {
        let mut inputs = VecDeque::from([input]);
        while let Some(input) = inputs.pop_front() {
            let actions = self.machine.handle(input);
            for action in actions {
                if let Some(next) = self.execute(action).await {
                    inputs.push_back(next);
                }
            }
            self.publish_state();
        }
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                log::debug!("[synclink] Connection state {} -> {}", current, state);
                *current = state;
                true
            }
        });
    }

    async fn execute(&mut self, action: ConnAction) -> Option<ConnInput> {
        match action {
            ConnAction::OpenTransport { epoch } => {
                self.ws = None;
                log::info!("[synclink] Connecting to {}", self.ws_url);
                let url = self.ws_url.clone();
                let timeouts = self.timeouts.clone();
                self.connecting = Some(Box::pin(async move { (epoch, connect(&url, &timeouts).await) }));
                None
            },
            ConnAction::CloseTransport => {
                self.connecting = None;
                if let Some(mut ws) = self.ws.take() {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await;
                }
                None
            },
            ConnAction::Send(msg) => self.send_or_lose(&msg).await,
            ConnAction::Resubscribe => {
                let messages = self.registry.handle_reconnect();
                if !messages.is_empty() {
                    log::info!("[synclink] Resubscribing {} queries", messages.len());
                }
                for msg in messages {
                    if let Some(lost) = self.send_or_lose(&msg).await {
                        return Some(lost);
                    }
                }
                None
            },
            ConnAction::NotifyConnected => {
                log::info!("[synclink] Connected to {}", self.ws_url);
                self.event_handlers.emit_connect();
                None
            },
            ConnAction::NotifyDisconnect(reason) => {
                log::info!("[synclink] Disconnected: {}", reason);
                self.registry.handle_disconnect();
                self.fail_requests(|| SyncLinkError::NotConnected);
                self.event_handlers.emit_disconnect(reason);
                None
            },
            ConnAction::ArmPingTimer(interval) => {
                self.ping_at = Some(TokioInstant::now() + interval);
                None
            },
            ConnAction::ArmPongTimer(timeout) => {
                self.pong_at = Some(TokioInstant::now() + timeout);
                None
            },
            ConnAction::DisarmPongTimer => {
                self.pong_at = None;
                None
            },
            ConnAction::DisarmTimers => {
                self.ping_at = None;
                self.pong_at = None;
                self.reconnect_at = None;
                None
            },
            ConnAction::ScheduleReconnect { attempt, delay } => {
                log::info!(
                    "[synclink] Attempting reconnection in {}ms (attempt {})",
                    delay.as_millis(),
                    attempt
                );
                self.reconnect_at = Some(TokioInstant::now() + delay);
                self.event_handlers.emit_reconnecting(attempt, delay);
                None
            },
            ConnAction::ReconnectExhausted { attempts } => {
                log::warn!(
                    "[synclink] Max reconnection attempts ({}) reached; staying disconnected",
                    attempts
                );
                if self.machine.fail_subscriptions_on_give_up() {
                    self.registry.fail_all(RemoteError::with_code(
                        format!("Gave up reconnecting after {} attempts", attempts),
                        SubscriptionErrorCode::ReconnectExhausted.as_str(),
                    ));
                }
                self.event_handlers.emit_reconnect_exhausted(attempts);
                None
            },
            ConnAction::ClearSubscriptions => {
                self.registry.dispose();
                self.fail_requests(|| SyncLinkError::NotConnected);
                None
            },
        }
    }

    /// Send a message; on failure drop the transport and report it lost.
    async fn send_or_lose(&mut self, msg: &WireMessage) -> Option<ConnInput> {
        match self.send_wire(msg).await {
            Ok(()) => None,
            Err(SyncLinkError::SerializationError { message, path }) => {
                log::warn!("[synclink] Dropping unencodable {} message at {}: {}", msg.type_name(), path, message);
                None
            },
            Err(e) => {
                log::warn!("[synclink] Send failed: {}", e);
                self.ws = None;
                Some(ConnInput::TransportClosed {
                    epoch: self.machine.epoch(),
                    reason: DisconnectReason::new(format!("Send failed: {}", e)),
                })
            },
        }
    }

    async fn send_wire(&mut self, msg: &WireMessage) -> Result<()> {
        let text = encode_message(msg)?;
        let ws = self.ws.as_mut().ok_or(SyncLinkError::NotConnected)?;
        self.event_handlers.emit_send(&text);
        ws.send(Message::Text(text.into()))
            .await
            .map_err(|e| SyncLinkError::WebSocketError(e.to_string()))
    }

    async fn flush_outbound(&mut self) {
        for msg in self.registry.take_outbound() {
            if let Some(lost) = self.send_or_lose(&msg).await {
                self.apply(lost).await;
                return;
            }
        }
    }

    async fn on_connect_result(&mut self, (epoch, result): (u64, Result<WebSocketStream>)) {
        match result {
            Ok(stream) => {
                if epoch != self.machine.epoch() {
                    return;
                }
                self.ws = Some(stream);
                self.apply(ConnInput::TransportOpened { epoch }).await;
            },
            Err(e) => {
                log::warn!("[synclink] Connection attempt failed: {}", e);
                self.event_handlers.emit_error(ConnectionError::new(e.to_string(), true));
                self.apply(ConnInput::TransportFailed {
                    epoch,
                    reason: DisconnectReason::new(e.to_string()),
                })
                .await;
            },
        }
    }

    async fn on_frame(&mut self, frame: Option<std::result::Result<Message, WsError>>) {
        let epoch = self.machine.epoch();
        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                let msg = e.to_string();
                self.ws = None;
                self.event_handlers.emit_error(ConnectionError::new(&msg, true));
                self.apply(ConnInput::TransportClosed {
                    epoch,
                    reason: DisconnectReason::new(format!("WebSocket error: {}", msg)),
                })
                .await;
                return;
            },
            None => {
                self.ws = None;
                self.apply(ConnInput::TransportClosed {
                    epoch,
                    reason: DisconnectReason::new("WebSocket stream ended"),
                })
                .await;
                return;
            },
        };

        let (raw, inbound) = decode_frame(frame);
        if let Some(raw) = raw {
            self.event_handlers.emit_receive(&raw);
        }
        match inbound {
            InboundFrame::Message(msg) => self.dispatch(msg).await,
            InboundFrame::Malformed(error) => {
                log::warn!("[synclink] Dropping inbound frame: {}", error);
                self.event_handlers
                    .emit_error(ConnectionError::new(format!("Dropped inbound frame: {}", error), true));
            },
            InboundFrame::Ping(payload) => {
                if let Some(ws) = self.ws.as_mut() {
                    let _ = ws.send(Message::Pong(payload)).await;
                }
            },
            InboundFrame::Close(frame) => {
                self.ws = None;
                let reason = match frame {
                    Some((code, reason)) => DisconnectReason::with_code(reason, code),
                    None => DisconnectReason::new("Server closed connection"),
                };
                self.apply(ConnInput::TransportClosed { epoch, reason }).await;
            },
            InboundFrame::Ignored => {},
        }
    }

    async fn dispatch(&mut self, msg: WireMessage) {
        match msg {
            WireMessage::QueryResult {
                subscription_id,
                value,
                ..
            } => {
                if !self.registry.handle_remote_update(&subscription_id, value) {
                    log::debug!("[synclink] Update for unknown query {}", subscription_id);
                }
            },
            WireMessage::Transition { modifications, .. } => {
                for modification in modifications {
                    let query_id = modification.query_id;
                    match modification.kind {
                        ModificationKind::QueryUpdated => {
                            let value = modification.value.unwrap_or(Value::Null);
                            if !self.registry.handle_remote_update(&query_id, value) {
                                log::debug!("[synclink] Transition for unknown query {}", query_id);
                            }
                        },
                        ModificationKind::QueryFailed => {
                            let message = modification
                                .error_message
                                .unwrap_or_else(|| "query failed".to_string());
                            self.registry.handle_remote_error(&query_id, RemoteError::new(message));
                        },
                        ModificationKind::QueryRemoved => {
                            log::debug!("[synclink] Server removed query {}", query_id);
                        },
                        ModificationKind::Other(kind) => {
                            log::debug!("[synclink] Ignoring modification '{}' for {}", kind, query_id);
                        },
                    }
                }
            },
            WireMessage::RequestResult {
                request_id,
                success,
                value,
                error_code,
                ..
            } => match self.requests.remove(&request_id) {
                Some(pending) => {
                    let result = if success {
                        Ok(value)
                    } else {
                        Err(SyncLinkError::ServerError {
                            message: failure_message(&value),
                            code: error_code,
                        })
                    };
                    let _ = pending.result_tx.send(result);
                },
                None => log::debug!("[synclink] Result for unknown request {}", request_id),
            },
            WireMessage::Error {
                message,
                error_code,
                subscription_id,
                request_id,
            } => {
                if let Some(pending) = request_id.as_ref().and_then(|id| self.requests.remove(id)) {
                    let _ = pending.result_tx.send(Err(SyncLinkError::ServerError {
                        message,
                        code: error_code,
                    }));
                    return;
                }
                let error = RemoteError {
                    message,
                    code: error_code,
                };
                match subscription_id {
                    Some(id) if self.registry.handle_remote_error(&id, error.clone()) => {},
                    _ => {
                        log::warn!("[synclink] Server error: {}", error);
                        self.event_handlers
                            .emit_error(ConnectionError::new(format!("Server error: {}", error), true));
                    },
                }
            },
            WireMessage::Pong => {
                let epoch = self.machine.epoch();
                self.apply(ConnInput::PongReceived { epoch }).await;
            },
            WireMessage::Ping => {
                if let Some(lost) = self.send_or_lose(&WireMessage::Pong).await {
                    self.apply(lost).await;
                }
            },
            WireMessage::Subscribed { subscription_id } => {
                log::trace!("[synclink] Server acknowledged {}", subscription_id);
            },
            WireMessage::Authenticated => {
                log::debug!("[synclink] Authenticated");
            },
            other @ (WireMessage::Subscribe { .. }
            | WireMessage::Unsubscribe { .. }
            | WireMessage::Request { .. }
            | WireMessage::Authenticate { .. }) => {
                log::warn!("[synclink] Ignoring client-only message type '{}' from server", other.type_name());
            },
        }
    }

    async fn handle_command(&mut self, cmd: ConnCmd) {
        match cmd {
            ConnCmd::Subscribe {
                query_path,
                args,
                options,
                handlers,
                result_tx,
            } => {
                let result = self.registry.create_subscription(&query_path, args, options, handlers);
                let _ = result_tx.send(result);
            },
            ConnCmd::Unsubscribe { id, result_tx } => {
                let removed = self.registry.remove_subscription(id);
                if let Some(tx) = result_tx {
                    let _ = tx.send(removed);
                }
            },
            ConnCmd::UpdateArgs { id, args, result_tx } => {
                let _ = result_tx.send(self.registry.update_subscription(id, args));
            },
            ConnCmd::Pause { id, result_tx } => {
                let _ = result_tx.send(self.registry.pause_subscription(id));
            },
            ConnCmd::Resume { id, result_tx } => {
                let _ = result_tx.send(self.registry.resume_subscription(id));
            },
            ConnCmd::GetSubscription { id, result_tx } => {
                let _ = result_tx.send(self.registry.subscription(id));
            },
            ConnCmd::ListSubscriptions { result_tx } => {
                let _ = result_tx.send(self.registry.list());
            },
            ConnCmd::SetAuth { token } => self.apply(ConnInput::SetAuth(token)).await,
            ConnCmd::ClearAuth => self.apply(ConnInput::ClearAuth).await,
            ConnCmd::Request {
                kind,
                path,
                args,
                result_tx,
            } => self.start_request(kind, path, args, result_tx).await,
            ConnCmd::Reconnect => self.apply(ConnInput::Start).await,
            ConnCmd::Shutdown { result_tx } => {
                self.apply(ConnInput::Close).await;
                let _ = result_tx.send(());
            },
        }
    }

    async fn start_request(
        &mut self,
        kind: RequestKind,
        path: String,
        args: Value,
        result_tx: oneshot::Sender<Result<Value>>,
    ) {
        if !self.machine.state().is_open() {
            let _ = result_tx.send(Err(SyncLinkError::NotConnected));
            return;
        }
        let request_id = self.next_request_id.to_string();
        self.next_request_id += 1;

        let msg = WireMessage::Request {
            kind,
            request_id: request_id.clone(),
            path: path.clone(),
            args,
        };
        match self.send_wire(&msg).await {
            Ok(()) => {
                let deadline = if SyncLinkTimeouts::is_no_timeout(self.timeouts.request_timeout) {
                    None
                } else {
                    Some(TokioInstant::now() + self.timeouts.request_timeout)
                };
                self.requests.insert(
                    request_id,
                    PendingRequest {
                        kind,
                        path,
                        deadline,
                        result_tx,
                    },
                );
            },
            Err(e @ SyncLinkError::SerializationError { .. }) => {
                let _ = result_tx.send(Err(e));
            },
            Err(e) => {
                let _ = result_tx.send(Err(e.clone()));
                self.ws = None;
                let epoch = self.machine.epoch();
                self.apply(ConnInput::TransportClosed {
                    epoch,
                    reason: DisconnectReason::new(format!("Send failed: {}", e)),
                })
                .await;
            },
        }
    }

    fn expire_requests(&mut self) {
        let now = TokioInstant::now();
        let expired: Vec<String> = self
            .requests
            .iter()
            .filter(|(_, r)| r.deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some(pending) = self.requests.remove(&id) {
                let kind = match pending.kind {
                    RequestKind::Mutation => "Mutation",
                    RequestKind::Action => "Action",
                };
                let _ = pending.result_tx.send(Err(SyncLinkError::TimeoutError(format!(
                    "{} '{}' timed out after {:?}",
                    kind, pending.path, self.timeouts.request_timeout
                ))));
            }
        }
    }

    fn fail_requests(&mut self, error: impl Fn() -> SyncLinkError) {
        for (_, pending) in self.requests.drain() {
            let _ = pending.result_tx.send(Err(error()));
        }
    }
}

/// Message text for a failed mutation/action: the value if it is a string,
/// otherwise its debug form.
fn failure_message(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null | Value::Undefined => "request failed".to_string(),
        other => format!("{:?}", other),
    }
}
