//! Connection state machine.
//!
//! [`ConnectionMachine::handle`] is the only code path that mutates
//! connection state. Transport and timer events are fed in as
//! [`ConnInput`]s, and the side effects the driver must perform come back
//! as [`ConnAction`]s. Nothing here does I/O, so every transition is
//! testable without a socket or a runtime.
//!
//! Every transport instance gets a fresh `epoch`. Inputs carrying an older
//! epoch belong to a transport that was already discarded and are ignored.

use std::fmt;
use std::time::Duration;

use crate::auth::AuthProvider;
use crate::codec::WireMessage;
use crate::event_handlers::DisconnectReason;
use crate::models::ConnectionOptions;
use crate::timeouts::SyncLinkTimeouts;

/// Lifecycle state of the sync connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected and not trying to connect.
    Disconnected,
    /// A transport is being opened.
    Connecting,
    /// Transport open, authenticated (if a token is set) and subscriptions replayed.
    Open,
    /// Waiting for the backoff delay before the next attempt.
    Reconnecting,
    /// Terminal. The client must be replaced.
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ConnInput {
    /// Begin connecting (construction, or an explicit reconnect request).
    Start,
    TransportOpened { epoch: u64 },
    /// Opening the transport failed (refused, TLS error, connect timeout).
    TransportFailed { epoch: u64, reason: DisconnectReason },
    /// An open transport closed or errored.
    TransportClosed { epoch: u64, reason: DisconnectReason },
    PingDue,
    PongReceived { epoch: u64 },
    PongTimeout,
    ReconnectDue,
    SetAuth(String),
    ClearAuth,
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ConnAction {
    OpenTransport { epoch: u64 },
    CloseTransport,
    Send(WireMessage),
    /// Replay every live subscription on the fresh transport.
    Resubscribe,
    NotifyConnected,
    NotifyDisconnect(DisconnectReason),
    ArmPingTimer(Duration),
    ArmPongTimer(Duration),
    DisarmPongTimer,
    /// Disarm ping, pong and reconnect timers.
    DisarmTimers,
    ScheduleReconnect { attempt: u32, delay: Duration },
    ReconnectExhausted { attempts: u32 },
    ClearSubscriptions,
}

/// `base * 2^(attempt-1)`, optionally capped by `max_reconnect_delay_ms`.
pub fn backoff_delay(options: &ConnectionOptions, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    let mut delay = options.reconnect_delay_ms.saturating_mul(factor);
    if let Some(max) = options.max_reconnect_delay_ms {
        delay = delay.min(max);
    }
    Duration::from_millis(delay)
}

#[derive(Debug)]
pub(crate) struct ConnectionMachine {
    state: ConnectionState,
    epoch: u64,
    reconnect_attempts: u32,
    awaiting_pong: bool,
    auth: AuthProvider,
    options: ConnectionOptions,
    keepalive_interval: Duration,
    pong_timeout: Duration,
}

impl ConnectionMachine {
    pub(crate) fn new(options: ConnectionOptions, timeouts: &SyncLinkTimeouts, auth: AuthProvider) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            epoch: 0,
            reconnect_attempts: 0,
            awaiting_pong: false,
            auth,
            options,
            keepalive_interval: timeouts.keepalive_interval,
            pong_timeout: timeouts.pong_timeout,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    #[cfg(test)]
    fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    #[cfg(test)]
    fn awaiting_pong(&self) -> bool {
        self.awaiting_pong
    }

    pub(crate) fn fail_subscriptions_on_give_up(&self) -> bool {
        self.options.fail_subscriptions_on_give_up
    }

    pub(crate) fn handle(&mut self, input: ConnInput) -> Vec<ConnAction> {
        if self.state == ConnectionState::Closed {
            return Vec::new();
        }

        match input {
            ConnInput::Start => self.on_start(),
            ConnInput::TransportOpened { epoch } => self.on_opened(epoch),
            ConnInput::TransportFailed { epoch, reason } | ConnInput::TransportClosed { epoch, reason } => {
                self.on_transport_lost(epoch, reason)
            },
            ConnInput::PingDue => self.on_ping_due(),
            ConnInput::PongReceived { epoch } => {
                if epoch != self.epoch || !self.awaiting_pong {
                    return Vec::new();
                }
                self.awaiting_pong = false;
                vec![ConnAction::DisarmPongTimer]
            },
            ConnInput::PongTimeout => self.on_pong_timeout(),
            ConnInput::ReconnectDue => {
                if self.state != ConnectionState::Reconnecting {
                    return Vec::new();
                }
                self.begin_connect()
            },
            ConnInput::SetAuth(token) => {
                self.auth = AuthProvider::JwtToken(token);
                match (self.state, self.auth.auth_message()) {
                    (ConnectionState::Open, Some(msg)) => vec![ConnAction::Send(msg)],
                    _ => Vec::new(),
                }
            },
            ConnInput::ClearAuth => {
                self.auth = AuthProvider::None;
                Vec::new()
            },
            ConnInput::Close => {
                let was_open = self.state == ConnectionState::Open;
                self.state = ConnectionState::Closed;
                self.awaiting_pong = false;
                let mut actions = vec![ConnAction::DisarmTimers, ConnAction::CloseTransport];
                if was_open {
                    actions.push(ConnAction::NotifyDisconnect(DisconnectReason::with_code(
                        "Client closed",
                        1000,
                    )));
                }
                actions.push(ConnAction::ClearSubscriptions);
                actions
            },
        }
    }

    fn on_start(&mut self) -> Vec<ConnAction> {
        match self.state {
            ConnectionState::Disconnected => {
                self.reconnect_attempts = 0;
                self.begin_connect()
            },
            // Skip the remaining backoff.
            ConnectionState::Reconnecting => {
                let mut actions = vec![ConnAction::DisarmTimers];
                actions.extend(self.begin_connect());
                actions
            },
            _ => Vec::new(),
        }
    }

    fn begin_connect(&mut self) -> Vec<ConnAction> {
        self.epoch += 1;
        self.state = ConnectionState::Connecting;
        self.awaiting_pong = false;
        vec![ConnAction::OpenTransport { epoch: self.epoch }]
    }

    fn on_opened(&mut self, epoch: u64) -> Vec<ConnAction> {
        if epoch != self.epoch || self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        self.state = ConnectionState::Open;
        self.reconnect_attempts = 0;
        self.awaiting_pong = false;

        let mut actions = vec![ConnAction::NotifyConnected];
        if let Some(msg) = self.auth.auth_message() {
            actions.push(ConnAction::Send(msg));
        }
        actions.push(ConnAction::Resubscribe);
        if !self.keepalive_interval.is_zero() {
            actions.push(ConnAction::ArmPingTimer(self.keepalive_interval));
        }
        actions
    }

    fn on_transport_lost(&mut self, epoch: u64, reason: DisconnectReason) -> Vec<ConnAction> {
        if epoch != self.epoch {
            return Vec::new();
        }
        let was_open = match self.state {
            ConnectionState::Open => true,
            ConnectionState::Connecting => false,
            _ => return Vec::new(),
        };
        self.awaiting_pong = false;

        let mut actions = vec![ConnAction::DisarmTimers];
        if was_open {
            actions.push(ConnAction::NotifyDisconnect(reason));
        }
        actions.extend(self.schedule_or_give_up());
        actions
    }

    fn schedule_or_give_up(&mut self) -> Vec<ConnAction> {
        if !self.options.auto_reconnect {
            self.state = ConnectionState::Disconnected;
            return Vec::new();
        }
        if self.reconnect_attempts >= self.options.max_reconnect_attempts {
            self.state = ConnectionState::Disconnected;
            return vec![ConnAction::ReconnectExhausted {
                attempts: self.reconnect_attempts,
            }];
        }
        self.reconnect_attempts += 1;
        self.state = ConnectionState::Reconnecting;
        vec![ConnAction::ScheduleReconnect {
            attempt: self.reconnect_attempts,
            delay: backoff_delay(&self.options, self.reconnect_attempts),
        }]
    }

    fn on_ping_due(&mut self) -> Vec<ConnAction> {
        if self.state != ConnectionState::Open {
            return Vec::new();
        }
        let mut actions = Vec::new();
        if !self.awaiting_pong {
            self.awaiting_pong = true;
            actions.push(ConnAction::Send(WireMessage::Ping));
            if !self.pong_timeout.is_zero() {
                actions.push(ConnAction::ArmPongTimer(self.pong_timeout));
            }
        }
        actions.push(ConnAction::ArmPingTimer(self.keepalive_interval));
        actions
    }

    /// The socket may still look open, but nothing is coming through.
    /// Drop it and reconnect right away with a fresh attempt budget.
    fn on_pong_timeout(&mut self) -> Vec<ConnAction> {
        if self.state != ConnectionState::Open || !self.awaiting_pong {
            return Vec::new();
        }
        self.reconnect_attempts = 0;
        let mut actions = vec![
            ConnAction::DisarmTimers,
            ConnAction::CloseTransport,
            ConnAction::NotifyDisconnect(DisconnectReason::new("Pong timeout")),
        ];
        actions.extend(self.begin_connect());
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(options: ConnectionOptions) -> ConnectionMachine {
        ConnectionMachine::new(options, &SyncLinkTimeouts::default(), AuthProvider::none())
    }

    fn open(m: &mut ConnectionMachine) {
        m.handle(ConnInput::Start);
        let epoch = m.epoch();
        m.handle(ConnInput::TransportOpened { epoch });
        assert_eq!(m.state(), ConnectionState::Open);
    }

    fn lost(m: &mut ConnectionMachine) -> Vec<ConnAction> {
        let epoch = m.epoch();
        m.handle(ConnInput::TransportFailed {
            epoch,
            reason: DisconnectReason::new("refused"),
        })
    }

    fn scheduled_delay(actions: &[ConnAction]) -> Option<Duration> {
        actions.iter().find_map(|a| match a {
            ConnAction::ScheduleReconnect { delay, .. } => Some(*delay),
            _ => None,
        })
    }

    #[test]
    fn test_backoff_doubles_from_base() {
        let options = ConnectionOptions::default();
        let delays: Vec<u64> = (1..=4).map(|n| backoff_delay(&options, n).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000]);
    }

    #[test]
    fn test_backoff_respects_cap() {
        let options = ConnectionOptions::default().with_max_reconnect_delay_ms(Some(3000));
        assert_eq!(backoff_delay(&options, 3), Duration::from_millis(3000));
        assert_eq!(backoff_delay(&options, 64), Duration::from_millis(3000));
    }

    #[test]
    fn test_open_sends_auth_then_resubscribes() {
        let mut m = ConnectionMachine::new(
            ConnectionOptions::default(),
            &SyncLinkTimeouts::default(),
            AuthProvider::jwt_token("tok".to_string()),
        );
        assert_eq!(m.handle(ConnInput::Start), vec![ConnAction::OpenTransport { epoch: 1 }]);
        let actions = m.handle(ConnInput::TransportOpened { epoch: 1 });
        assert_eq!(
            actions,
            vec![
                ConnAction::NotifyConnected,
                ConnAction::Send(WireMessage::Authenticate { token: "tok".into() }),
                ConnAction::Resubscribe,
                ConnAction::ArmPingTimer(Duration::from_millis(30_000)),
            ]
        );
    }

    #[test]
    fn test_failed_attempts_schedule_exponential_backoff() {
        let mut m = machine(ConnectionOptions::default());
        m.handle(ConnInput::Start);

        let mut delays = Vec::new();
        for _ in 0..4 {
            let actions = lost(&mut m);
            assert_eq!(m.state(), ConnectionState::Reconnecting);
            delays.push(scheduled_delay(&actions).unwrap().as_millis() as u64);
            m.handle(ConnInput::ReconnectDue);
            assert_eq!(m.state(), ConnectionState::Connecting);
        }
        assert_eq!(delays, vec![1000, 2000, 4000, 8000]);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut m = machine(ConnectionOptions::default().with_max_reconnect_attempts(2));
        m.handle(ConnInput::Start);
        lost(&mut m);
        m.handle(ConnInput::ReconnectDue);
        lost(&mut m);
        m.handle(ConnInput::ReconnectDue);
        let actions = lost(&mut m);
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert!(actions.contains(&ConnAction::ReconnectExhausted { attempts: 2 }));

        // An explicit restart gets a fresh budget.
        assert_eq!(m.handle(ConnInput::Start), vec![ConnAction::OpenTransport { epoch: 4 }]);
        assert_eq!(m.reconnect_attempts(), 0);
    }

    #[test]
    fn test_open_resets_attempts() {
        let mut m = machine(ConnectionOptions::default());
        m.handle(ConnInput::Start);
        lost(&mut m);
        m.handle(ConnInput::ReconnectDue);
        assert_eq!(m.reconnect_attempts(), 1);
        let epoch = m.epoch();
        m.handle(ConnInput::TransportOpened { epoch });
        assert_eq!(m.reconnect_attempts(), 0);
    }

    #[test]
    fn test_no_auto_reconnect_stays_disconnected() {
        let mut m = machine(ConnectionOptions::default().with_auto_reconnect(false));
        open(&mut m);
        let actions = lost(&mut m);
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert!(scheduled_delay(&actions).is_none());
        assert!(actions.iter().any(|a| matches!(a, ConnAction::NotifyDisconnect(_))));
    }

    #[test]
    fn test_disconnect_notified_only_when_open() {
        let mut m = machine(ConnectionOptions::default());
        m.handle(ConnInput::Start);
        let actions = lost(&mut m);
        assert!(!actions.iter().any(|a| matches!(a, ConnAction::NotifyDisconnect(_))));
    }

    #[test]
    fn test_ping_waits_for_pong_before_next_ping() {
        let mut m = machine(ConnectionOptions::default());
        open(&mut m);

        let first = m.handle(ConnInput::PingDue);
        assert_eq!(
            first,
            vec![
                ConnAction::Send(WireMessage::Ping),
                ConnAction::ArmPongTimer(Duration::from_millis(10_000)),
                ConnAction::ArmPingTimer(Duration::from_millis(30_000)),
            ]
        );
        assert!(m.awaiting_pong());

        let second = m.handle(ConnInput::PingDue);
        assert_eq!(second, vec![ConnAction::ArmPingTimer(Duration::from_millis(30_000))]);

        let epoch = m.epoch();
        assert_eq!(m.handle(ConnInput::PongReceived { epoch }), vec![ConnAction::DisarmPongTimer]);
        assert!(!m.awaiting_pong());
    }

    #[test]
    fn test_pong_timeout_forces_immediate_reconnect() {
        let mut m = machine(ConnectionOptions::default());
        open(&mut m);
        m.handle(ConnInput::PingDue);

        let actions = m.handle(ConnInput::PongTimeout);
        assert_eq!(
            actions,
            vec![
                ConnAction::DisarmTimers,
                ConnAction::CloseTransport,
                ConnAction::NotifyDisconnect(DisconnectReason::new("Pong timeout")),
                ConnAction::OpenTransport { epoch: 2 },
            ]
        );
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(m.reconnect_attempts(), 0);
    }

    #[test]
    fn test_pong_timeout_ignored_after_pong() {
        let mut m = machine(ConnectionOptions::default());
        open(&mut m);
        m.handle(ConnInput::PingDue);
        m.handle(ConnInput::PongReceived { epoch: 1 });
        assert!(m.handle(ConnInput::PongTimeout).is_empty());
        assert_eq!(m.state(), ConnectionState::Open);
    }

    #[test]
    fn test_stale_epoch_inputs_are_ignored() {
        let mut m = machine(ConnectionOptions::default());
        open(&mut m);
        m.handle(ConnInput::PingDue);
        m.handle(ConnInput::PongTimeout);
        assert_eq!(m.epoch(), 2);

        // Late close from the discarded transport.
        let actions = m.handle(ConnInput::TransportClosed {
            epoch: 1,
            reason: DisconnectReason::new("old"),
        });
        assert!(actions.is_empty());
        assert!(m.handle(ConnInput::TransportOpened { epoch: 1 }).is_empty());
        assert_eq!(m.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_set_auth_sends_only_when_open() {
        let mut m = machine(ConnectionOptions::default());
        assert!(m.handle(ConnInput::SetAuth("a".into())).is_empty());
        open(&mut m);
        assert_eq!(
            m.handle(ConnInput::SetAuth("b".into())),
            vec![ConnAction::Send(WireMessage::Authenticate { token: "b".into() })]
        );
        assert!(m.handle(ConnInput::ClearAuth).is_empty());
        assert_eq!(m.state(), ConnectionState::Open);

        // Cleared token is not sent on the next open.
        lost(&mut m);
        m.handle(ConnInput::ReconnectDue);
        let epoch = m.epoch();
        let actions = m.handle(ConnInput::TransportOpened { epoch });
        assert!(!actions.iter().any(|a| matches!(a, ConnAction::Send(_))));
    }

    #[test]
    fn test_close_is_terminal() {
        let mut m = machine(ConnectionOptions::default());
        open(&mut m);
        let actions = m.handle(ConnInput::Close);
        assert_eq!(actions.first(), Some(&ConnAction::DisarmTimers));
        assert!(actions.contains(&ConnAction::CloseTransport));
        assert!(actions.contains(&ConnAction::ClearSubscriptions));
        assert_eq!(m.state(), ConnectionState::Closed);

        assert!(m.handle(ConnInput::Start).is_empty());
        assert!(m.handle(ConnInput::Close).is_empty());
        assert!(lost(&mut m).is_empty());
        assert_eq!(m.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_start_during_backoff_connects_now() {
        let mut m = machine(ConnectionOptions::default());
        m.handle(ConnInput::Start);
        lost(&mut m);
        let actions = m.handle(ConnInput::Start);
        assert_eq!(
            actions,
            vec![ConnAction::DisarmTimers, ConnAction::OpenTransport { epoch: 2 }]
        );
        // The old backoff timer firing late has no effect.
        assert!(m.handle(ConnInput::ReconnectDue).is_empty());
    }
}
