//! Connection state machine
//!
//! [`transition`] is the pure `(state, event) -> state` core. [`StateMachine`]
//! wraps it with the two timers a session owns:
//!
//! - `negotiation`: armed when the offer is created, fails the attempt with
//!   "connection timed out" unless connectivity is reached first
//! - `disconnect_grace`: armed when a live connection drops, fails the attempt
//!   with "connection lost" unless the connection comes back first
//!
//! Timers are plain deadlines; the negotiator sleeps until
//! [`StateMachine::next_deadline`] and then calls [`StateMachine::poll_timers`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::config::SessionConfig;
use crate::media::TransportState;

pub const TIMEOUT_MESSAGE: &str = "connection timed out";
pub const FAILED_MESSAGE: &str = "connection failed";
pub const LOST_MESSAGE: &str = "connection lost";
pub const CHANNEL_CLOSED_MESSAGE: &str = "signaling channel closed";

/// User-facing connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    New,
    FetchingBootstrap,
    ChannelOpen,
    Negotiating,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Media is flowing
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Completed)
    }

    /// No further progress is possible for this attempt
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::FetchingBootstrap => write!(f, "fetchingBootstrap"),
            ConnectionState::ChannelOpen => write!(f, "channelOpen"),
            ConnectionState::Negotiating => write!(f, "negotiating"),
            ConnectionState::Checking => write!(f, "checking"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Completed => write!(f, "completed"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// State plus the failure message, as seen by UI surfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SessionStatus {
    pub fn new(state: ConnectionState) -> Self {
        Self {
            state,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: ConnectionState::Failed,
            message: Some(message.into()),
        }
    }
}

/// Input to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    BootstrapStarted,
    BootstrapFailed(String),
    ChannelOpened,
    ChannelFailed(String),
    ChannelClosed,
    MediaFailed(String),
    /// Channel is open and the local offer is about to be created
    NegotiationStarted,
    /// Local offer created and sent; starts the negotiation timer
    OfferCreated,
    Transport(TransportState),
    NegotiationTimeout,
    GraceExpired,
    Teardown,
}

/// Pure transition function
///
/// Returns the next status, or `None` when `event` does not change `state`.
pub fn transition(state: ConnectionState, event: &SessionEvent) -> Option<SessionStatus> {
    use ConnectionState as S;
    use SessionEvent as E;

    match (state, event) {
        (S::Closed, _) => None,
        (_, E::Teardown) => Some(SessionStatus::new(S::Closed)),
        (S::Failed, _) => None,

        (S::New, E::BootstrapStarted) => Some(SessionStatus::new(S::FetchingBootstrap)),
        (_, E::BootstrapFailed(message))
        | (_, E::ChannelFailed(message))
        | (_, E::MediaFailed(message)) => Some(SessionStatus::failed(message.clone())),
        (_, E::ChannelClosed) => Some(SessionStatus::failed(CHANNEL_CLOSED_MESSAGE)),
        (S::FetchingBootstrap, E::ChannelOpened) => Some(SessionStatus::new(S::ChannelOpen)),
        (S::ChannelOpen, E::NegotiationStarted) => Some(SessionStatus::new(S::Negotiating)),

        (_, E::Transport(TransportState::Failed)) => Some(SessionStatus::failed(FAILED_MESSAGE)),
        (S::Negotiating | S::Disconnected, E::Transport(TransportState::Checking)) => {
            Some(SessionStatus::new(S::Checking))
        }
        (
            S::Negotiating | S::Checking | S::Disconnected,
            E::Transport(TransportState::Connected),
        ) => Some(SessionStatus::new(S::Connected)),
        (
            S::Negotiating | S::Checking | S::Disconnected | S::Connected,
            E::Transport(TransportState::Completed),
        ) => Some(SessionStatus::new(S::Completed)),
        (S::Checking | S::Connected | S::Completed, E::Transport(TransportState::Disconnected)) => {
            Some(SessionStatus::new(S::Disconnected))
        }

        (S::Negotiating | S::Checking | S::Disconnected, E::NegotiationTimeout) => {
            Some(SessionStatus::failed(TIMEOUT_MESSAGE))
        }
        (S::Checking | S::Disconnected, E::GraceExpired) => {
            Some(SessionStatus::failed(LOST_MESSAGE))
        }

        _ => None,
    }
}

/// Named session timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    Negotiation,
    DisconnectGrace,
}

/// Deadlines of the armed timers
#[derive(Debug, Default, Clone)]
pub struct SessionTimers {
    negotiation: Option<Instant>,
    disconnect_grace: Option<Instant>,
}

impl SessionTimers {
    fn slot(&mut self, timer: Timer) -> &mut Option<Instant> {
        match timer {
            Timer::Negotiation => &mut self.negotiation,
            Timer::DisconnectGrace => &mut self.disconnect_grace,
        }
    }

    pub fn start(&mut self, timer: Timer, deadline: Instant) {
        *self.slot(timer) = Some(deadline);
    }

    pub fn cancel(&mut self, timer: Timer) {
        *self.slot(timer) = None;
    }

    pub fn cancel_all(&mut self) {
        self.negotiation = None;
        self.disconnect_grace = None;
    }

    pub fn is_armed(&self, timer: Timer) -> bool {
        match timer {
            Timer::Negotiation => self.negotiation.is_some(),
            Timer::DisconnectGrace => self.disconnect_grace.is_some(),
        }
    }

    /// The earliest armed timer
    pub fn next_deadline(&self) -> Option<(Timer, Instant)> {
        let negotiation = self.negotiation.map(|at| (Timer::Negotiation, at));
        let grace = self.disconnect_grace.map(|at| (Timer::DisconnectGrace, at));
        match (negotiation, grace) {
            (Some(a), Some(b)) => Some(if b.1 < a.1 { b } else { a }),
            (a, b) => a.or(b),
        }
    }
}

/// State machine for one connection attempt
#[derive(Debug, Clone)]
pub struct StateMachine {
    status: SessionStatus,
    timers: SessionTimers,
    negotiation_timeout: Duration,
    disconnect_grace: Duration,
    live_reached: bool,
}

impl StateMachine {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            status: SessionStatus::new(ConnectionState::New),
            timers: SessionTimers::default(),
            negotiation_timeout: config.negotiation_timeout(),
            disconnect_grace: config.disconnect_grace(),
            live_reached: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.status.state
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn timers(&self) -> &SessionTimers {
        &self.timers
    }

    /// Whether the attempt has been live at least once
    pub fn live_reached(&self) -> bool {
        self.live_reached
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline().map(|(_, at)| at)
    }

    /// Apply `event` at `now`, returning the new status on a state change
    pub fn apply(&mut self, event: SessionEvent, now: Instant) -> Option<SessionStatus> {
        // Once media has flowed, signaling is no longer needed
        if self.live_reached
            && matches!(
                event,
                SessionEvent::ChannelFailed(_) | SessionEvent::ChannelClosed
            )
        {
            debug!("Ignoring {:?} after connection was established", event);
            return None;
        }

        if event == SessionEvent::OfferCreated {
            if self.status.state == ConnectionState::Negotiating
                && !self.timers.is_armed(Timer::Negotiation)
            {
                self.timers
                    .start(Timer::Negotiation, now + self.negotiation_timeout);
            }
            return None;
        }

        let next = transition(self.status.state, &event)?;
        if next == self.status {
            return None;
        }

        self.status = next.clone();
        self.update_timers(now);
        Some(next)
    }

    /// Fire every timer due at `now`
    ///
    /// Returns the last status change caused by an expired timer.
    pub fn poll_timers(&mut self, now: Instant) -> Option<SessionStatus> {
        let mut changed = None;
        while let Some((timer, at)) = self.timers.next_deadline() {
            if at > now {
                break;
            }
            self.timers.cancel(timer);
            let event = match timer {
                Timer::Negotiation => SessionEvent::NegotiationTimeout,
                Timer::DisconnectGrace => SessionEvent::GraceExpired,
            };
            debug!("{:?} timer expired in state {}", timer, self.status.state);
            if let Some(status) = self.apply(event, now) {
                changed = Some(status);
            }
        }
        changed
    }

    fn update_timers(&mut self, now: Instant) {
        let state = self.status.state;
        if state.is_terminal() {
            self.timers.cancel_all();
        } else if state.is_live() {
            self.live_reached = true;
            self.timers.cancel(Timer::Negotiation);
            self.timers.cancel(Timer::DisconnectGrace);
        } else if state == ConnectionState::Disconnected
            && !self.timers.is_armed(Timer::DisconnectGrace)
        {
            self.timers
                .start(Timer::DisconnectGrace, now + self.disconnect_grace);
        }
    }
}
