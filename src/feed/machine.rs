//! Connection lifecycle as an explicit state machine.
//!
//! `transition` is pure: it takes the current machine and an event and
//! returns the next machine plus at most one effect for the driver to carry
//! out. Timers and sockets live in the driver, so retry accounting can be
//! exercised without either.

use crate::state::ConnectionStatus;
use serde::Serialize;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal until a new connect request
    Failed,
}

impl ConnectionState {
    pub fn status(&self) -> ConnectionStatus {
        match self {
            ConnectionState::Connected => ConnectionStatus::Connected,
            ConnectionState::Failed => ConnectionStatus::Error,
            _ => ConnectionStatus::Disconnected,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectRequested,
    Opened,
    Closed { clean: bool },
    TransportError,
    RetryDue,
    DisconnectRequested,
}

/// Work the driver performs after a transition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    Open,
    ScheduleRetry(Duration),
    CancelRetry,
    Close,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectMachine {
    state: ConnectionState,
    attempts: u32,
    policy: RetryPolicy,
}

impl ReconnectMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failed attempts since the last successful connect
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    fn with(self, state: ConnectionState, attempts: u32) -> Self {
        Self {
            state,
            attempts,
            ..self
        }
    }

    pub fn transition(self, event: ConnectionEvent) -> (Self, Option<Effect>) {
        use ConnectionEvent as Ev;
        use ConnectionState as St;

        match (self.state, event) {
            (St::Disconnected, Ev::ConnectRequested) => {
                (self.with(St::Connecting, 0), Some(Effect::Open))
            }
            // A fresh request after giving up restarts with a full budget
            (St::Failed, Ev::ConnectRequested) => {
                (self.with(St::Connecting, 0), Some(Effect::Open))
            }
            // Already connecting, connected, or waiting on a retry
            (_, Ev::ConnectRequested) => (self, None),

            (St::Connecting, Ev::Opened) => (self.with(St::Connected, 0), None),

            (St::Connecting | St::Connected, Ev::Closed { clean: true }) => {
                (self.with(St::Disconnected, 0), None)
            }
            (St::Connecting | St::Connected, Ev::Closed { clean: false } | Ev::TransportError) => {
                self.fail()
            }

            (St::Reconnecting, Ev::RetryDue) => {
                (self.with(St::Connecting, self.attempts), Some(Effect::Open))
            }

            (St::Reconnecting, Ev::DisconnectRequested) => {
                (self.with(St::Disconnected, 0), Some(Effect::CancelRetry))
            }
            (St::Connecting | St::Connected, Ev::DisconnectRequested) => {
                (self.with(St::Disconnected, 0), Some(Effect::Close))
            }
            (St::Failed, Ev::DisconnectRequested) => (self.with(St::Disconnected, 0), None),

            // Stale events (late open, late timer, close after disconnect)
            _ => (self, None),
        }
    }

    fn fail(self) -> (Self, Option<Effect>) {
        if self.attempts >= self.policy.max_attempts {
            (self.with(ConnectionState::Failed, self.attempts), None)
        } else {
            (
                self.with(ConnectionState::Reconnecting, self.attempts + 1),
                Some(Effect::ScheduleRetry(self.policy.delay)),
            )
        }
    }
}
