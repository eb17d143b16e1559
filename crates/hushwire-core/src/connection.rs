//! Transport connection state machine.
//!
//! Keeps at most one live socket per logical session and reconnects after
//! unexpected closes. Uses the action pattern: every input returns actions for
//! the driver to execute, so the machine itself performs no I/O and owns no
//! timers.
//!
//! # State Machine
//!
//! ```text
//!          connect()          transport_opened
//! ┌──────┐ ───────> ┌────────────┐ ───────> ┌──────┐
//! │ Idle │          │ Connecting │          │ Open │
//! └──────┘ <─┐      └────────────┘          └──────┘
//!    ^       │            │ error / close       │ close
//!    │       │            v                     v
//!    │       │      ┌────────┐  timer (2s/3s)
//!    │       └──────│ Closed │ ─────────────> Connecting
//!    │ disconnect() └────────┘
//!    └────────────────── (any state)
//! ```
//!
//! Every transport attempt carries an [`AttemptId`]; events from a superseded
//! attempt are ignored. Reconnect timers carry a [`TimerId`]; a timer that is
//! no longer current is a guaranteed no-op.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{error::ConnectionError, event::ServerEvent};

/// Delay before reconnecting after a clean close
pub const DEFAULT_CLOSE_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Delay before reconnecting after a failure at connect time
pub const DEFAULT_CONNECT_FAILURE_DELAY: Duration = Duration::from_secs(3);

/// Close code for policy violation (server rejected the token)
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Application close code for an expired session
pub const CLOSE_SESSION_EXPIRED: u16 = 4001;

/// Close code used for a user-initiated disconnect
pub const CLOSE_NORMAL: u16 = 1000;

/// Identity of one transport attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(pub u64);

/// Identity of one scheduled reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport and none wanted
    Idle,
    /// Transport attempt in flight
    Connecting,
    /// Transport open
    Open,
    /// Transport lost; a reconnect may be pending
    Closed,
}

/// Reconnect behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay after a close
    pub close_delay: Duration,
    /// Delay after a connect-time failure
    pub connect_failure_delay: Duration,
    /// Close codes meaning "credentials rejected"
    pub auth_close_codes: Vec<u16>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            close_delay: DEFAULT_CLOSE_RECONNECT_DELAY,
            connect_failure_delay: DEFAULT_CONNECT_FAILURE_DELAY,
            auth_close_codes: vec![CLOSE_POLICY_VIOLATION, CLOSE_SESSION_EXPIRED],
        }
    }
}

/// Actions returned by the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open a new transport tagged with `attempt`
    OpenTransport {
        /// Attempt tag to report back with
        attempt: AttemptId,
    },

    /// Close the transport of `attempt`
    CloseTransport {
        /// Attempt to close
        attempt: AttemptId,
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },

    /// Start a reconnect timer
    ScheduleReconnect {
        /// Timer tag to report back with
        timer: TimerId,
        /// Delay until it fires
        delay: Duration,
    },

    /// Cancel a reconnect timer
    CancelReconnect {
        /// Timer to cancel
        timer: TimerId,
    },

    /// Credentials were rejected: log out and wipe
    SessionExpired,

    /// Hand an inbound event to the delivery pipeline
    Dispatch(ServerEvent),
}

/// Connection state machine.
///
/// Pure: no I/O, no clock. Delays are carried in actions.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    state: ConnectionState,
    policy: ReconnectPolicy,
    session_live: bool,
    attempt: Option<AttemptId>,
    next_attempt: u64,
    reconnect_timer: Option<TimerId>,
    next_timer: u64,
}

impl ConnectionManager {
    /// Create an idle manager. The session starts not live.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Idle,
            policy,
            session_live: false,
            attempt: None,
            next_attempt: 1,
            reconnect_timer: None,
            next_timer: 1,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current transport attempt, if any.
    pub fn attempt(&self) -> Option<AttemptId> {
        self.attempt
    }

    /// Pending reconnect timer, if any.
    pub fn reconnect_timer(&self) -> Option<TimerId> {
        self.reconnect_timer
    }

    /// True while the user is logged in.
    pub fn is_session_live(&self) -> bool {
        self.session_live
    }

    /// Mark the session live (login) or not (logout).
    ///
    /// Going not live cancels any pending reconnect.
    pub fn set_session_live(&mut self, live: bool) -> Vec<ConnectionAction> {
        self.session_live = live;
        if live {
            return vec![];
        }
        self.cancel_timer().into_iter().collect()
    }

    /// Start a transport attempt.
    ///
    /// No-op while Connecting or Open, and refused while the session is not
    /// live.
    pub fn connect(&mut self) -> Vec<ConnectionAction> {
        if !self.session_live {
            info!("connect refused: session not live");
            return vec![];
        }

        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => {
                debug!(state = ?self.state, "connect ignored: transport already active");
                vec![]
            },
            ConnectionState::Idle | ConnectionState::Closed => {
                let attempt = AttemptId(self.next_attempt);
                self.next_attempt += 1;
                self.attempt = Some(attempt);
                self.state = ConnectionState::Connecting;

                let mut actions: Vec<_> = self.cancel_timer().into_iter().collect();
                actions.push(ConnectionAction::OpenTransport { attempt });
                info!(attempt = attempt.0, "connecting");
                actions
            },
        }
    }

    /// The transport of `attempt` is open.
    pub fn transport_opened(&mut self, attempt: AttemptId) -> Vec<ConnectionAction> {
        if !self.is_current(attempt) || self.state != ConnectionState::Connecting {
            debug!(attempt = attempt.0, "ignoring open of superseded attempt");
            return vec![];
        }

        self.state = ConnectionState::Open;
        info!(attempt = attempt.0, "connected");
        self.cancel_timer().into_iter().collect()
    }

    /// The transport of `attempt` reported an error.
    ///
    /// Only clears the connecting state; the close that follows schedules the
    /// reconnect.
    pub fn transport_error(&mut self, attempt: AttemptId, reason: &str) -> Vec<ConnectionAction> {
        if !self.is_current(attempt) {
            return vec![];
        }

        warn!(attempt = attempt.0, reason, "transport error");
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Closed;
        }
        vec![]
    }

    /// The transport of `attempt` closed with `code`.
    pub fn transport_closed(
        &mut self,
        attempt: AttemptId,
        code: u16,
        reason: &str,
    ) -> Vec<ConnectionAction> {
        if !self.is_current(attempt) {
            debug!(attempt = attempt.0, code, "ignoring close of superseded attempt");
            return vec![];
        }

        self.state = ConnectionState::Closed;
        self.attempt = None;

        if self.policy.auth_close_codes.contains(&code) {
            warn!(code, reason, "transport rejected credentials");
            return self.expire();
        }

        info!(code, reason, "transport closed");
        self.schedule_reconnect(self.policy.close_delay)
    }

    /// Opening the transport of `attempt` failed outright.
    pub fn connect_failed(
        &mut self,
        attempt: AttemptId,
        error: &ConnectionError,
    ) -> Vec<ConnectionAction> {
        if !self.is_current(attempt) {
            return vec![];
        }

        self.state = ConnectionState::Closed;
        self.attempt = None;

        if error.is_auth() {
            warn!(%error, "connect rejected credentials");
            return self.expire();
        }

        warn!(%error, "connect failed");
        self.schedule_reconnect(self.policy.connect_failure_delay)
    }

    /// A reconnect timer fired.
    pub fn reconnect_timer_fired(&mut self, timer: TimerId) -> Vec<ConnectionAction> {
        if self.reconnect_timer != Some(timer) {
            debug!(timer = timer.0, "ignoring stale reconnect timer");
            return vec![];
        }

        self.reconnect_timer = None;
        self.connect()
    }

    /// Tear down the transport and stop reconnecting. Idempotent.
    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        let mut actions: Vec<_> = self.cancel_timer().into_iter().collect();

        if let Some(attempt) = self.attempt.take() {
            actions.push(ConnectionAction::CloseTransport {
                attempt,
                code: CLOSE_NORMAL,
                reason: "client disconnect".to_string(),
            });
        }

        if self.state != ConnectionState::Idle {
            info!("disconnected");
        }
        self.state = ConnectionState::Idle;
        actions
    }

    /// A text frame arrived on the transport of `attempt`.
    ///
    /// Unknown kinds and malformed frames are logged and dropped.
    pub fn frame_received(&mut self, attempt: AttemptId, text: &str) -> Vec<ConnectionAction> {
        if !self.is_current(attempt) {
            return vec![];
        }

        match ServerEvent::parse(text) {
            Ok(Some(event)) => {
                debug!(kind = event.kind(), "event received");
                vec![ConnectionAction::Dispatch(event)]
            },
            Ok(None) => {
                debug!("ignoring unknown event kind");
                vec![]
            },
            Err(err) => {
                warn!(error = %err, "dropping malformed frame");
                vec![]
            },
        }
    }

    fn is_current(&self, attempt: AttemptId) -> bool {
        self.attempt == Some(attempt)
    }

    fn expire(&mut self) -> Vec<ConnectionAction> {
        self.session_live = false;
        let mut actions: Vec<_> = self.cancel_timer().into_iter().collect();
        actions.push(ConnectionAction::SessionExpired);
        actions
    }

    fn schedule_reconnect(&mut self, delay: Duration) -> Vec<ConnectionAction> {
        let mut actions: Vec<_> = self.cancel_timer().into_iter().collect();

        if !self.session_live {
            debug!("not reconnecting: session not live");
            return actions;
        }

        let timer = TimerId(self.next_timer);
        self.next_timer += 1;
        self.reconnect_timer = Some(timer);
        actions.push(ConnectionAction::ScheduleReconnect { timer, delay });
        actions
    }

    fn cancel_timer(&mut self) -> Option<ConnectionAction> {
        self.reconnect_timer.take().map(|timer| ConnectionAction::CancelReconnect { timer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live() -> ConnectionManager {
        let mut conn = ConnectionManager::new(ReconnectPolicy::default());
        conn.set_session_live(true);
        conn
    }

    fn open(conn: &mut ConnectionManager) -> AttemptId {
        let actions = conn.connect();
        let Some(ConnectionAction::OpenTransport { attempt }) = actions.last().cloned() else {
            panic!("expected OpenTransport, got {actions:?}");
        };
        conn.transport_opened(attempt);
        attempt
    }

    #[test]
    fn connect_lifecycle() {
        let mut conn = live();
        assert_eq!(conn.state(), ConnectionState::Idle);

        let attempt = open(&mut conn);
        assert_eq!(conn.state(), ConnectionState::Open);
        assert_eq!(conn.attempt(), Some(attempt));

        let actions = conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Idle);
        assert!(matches!(
            actions.as_slice(),
            [ConnectionAction::CloseTransport { code: CLOSE_NORMAL, .. }]
        ));
    }

    #[test]
    fn refused_when_not_live() {
        let mut conn = ConnectionManager::new(ReconnectPolicy::default());
        assert!(conn.connect().is_empty());
        assert_eq!(conn.state(), ConnectionState::Idle);
    }

    #[test]
    fn double_connect_opens_one_transport() {
        let mut conn = live();
        let first = conn.connect();
        let second = conn.connect();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn clean_close_schedules_reconnect() {
        let mut conn = live();
        let attempt = open(&mut conn);

        let actions = conn.transport_closed(attempt, 1006, "abnormal");
        assert_eq!(conn.state(), ConnectionState::Closed);
        let [ConnectionAction::ScheduleReconnect { timer, delay }] = actions.as_slice() else {
            panic!("expected one reconnect, got {actions:?}");
        };
        assert_eq!(*delay, DEFAULT_CLOSE_RECONNECT_DELAY);

        let actions = conn.reconnect_timer_fired(*timer);
        assert!(matches!(actions.as_slice(), [ConnectionAction::OpenTransport { .. }]));
    }

    #[test]
    fn auth_close_expires_session() {
        for code in [CLOSE_POLICY_VIOLATION, CLOSE_SESSION_EXPIRED] {
            let mut conn = live();
            let attempt = open(&mut conn);

            let actions = conn.transport_closed(attempt, code, "");
            assert_eq!(actions, vec![ConnectionAction::SessionExpired]);
            assert!(!conn.is_session_live());
            assert!(conn.connect().is_empty());
        }
    }

    #[test]
    fn connect_failure_uses_longer_delay() {
        let mut conn = live();
        let actions = conn.connect();
        let Some(ConnectionAction::OpenTransport { attempt }) = actions.first().cloned() else {
            panic!("expected OpenTransport");
        };

        let actions = conn.connect_failed(attempt, &ConnectionError::Transport("refused".into()));
        let [ConnectionAction::ScheduleReconnect { delay, .. }] = actions.as_slice() else {
            panic!("expected ScheduleReconnect");
        };
        assert_eq!(*delay, DEFAULT_CONNECT_FAILURE_DELAY);
    }

    #[test]
    fn connect_unauthorized_expires_session() {
        let mut conn = live();
        conn.connect();
        let attempt = conn.attempt().unwrap();

        let err = ConnectionError::Unauthorized { reason: "401".into() };
        assert_eq!(conn.connect_failed(attempt, &err), vec![ConnectionAction::SessionExpired]);
    }

    #[test]
    fn stale_timer_is_noop() {
        let mut conn = live();
        let attempt = open(&mut conn);
        conn.transport_closed(attempt, 1006, "");
        let stale = conn.reconnect_timer().unwrap();

        conn.disconnect();
        assert!(conn.reconnect_timer_fired(stale).is_empty());
        assert_eq!(conn.state(), ConnectionState::Idle);
    }

    #[test]
    fn superseded_attempt_events_are_ignored() {
        let mut conn = live();
        let old = open(&mut conn);
        conn.disconnect();
        let new = open(&mut conn);

        assert!(conn.transport_closed(old, 1006, "").is_empty());
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(conn.frame_received(old, r#"{"type":"chat_request"}"#).is_empty());
        assert_eq!(conn.frame_received(new, r#"{"type":"chat_request"}"#).len(), 1);
    }

    #[test]
    fn error_then_close_reconnects_once() {
        let mut conn = live();
        conn.connect();
        let attempt = conn.attempt().unwrap();

        assert!(conn.transport_error(attempt, "boom").is_empty());
        assert_eq!(conn.state(), ConnectionState::Closed);

        let actions = conn.transport_closed(attempt, 1006, "");
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], ConnectionAction::ScheduleReconnect { .. }));
    }

    #[test]
    fn logout_cancels_pending_reconnect() {
        let mut conn = live();
        let attempt = open(&mut conn);
        conn.transport_closed(attempt, 1006, "");
        let timer = conn.reconnect_timer().unwrap();

        assert_eq!(conn.set_session_live(false), vec![ConnectionAction::CancelReconnect { timer }]);
        assert!(conn.reconnect_timer_fired(timer).is_empty());
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let mut conn = live();
        let attempt = open(&mut conn);
        assert!(conn.frame_received(attempt, "not json").is_empty());
        assert!(conn.frame_received(attempt, r#"{"type":"typing"}"#).is_empty());
    }
}
