//! Lifecycle state machines.
//!
//! Every entity moves through its states only along the transitions listed here.
//! Implementations call [`ConnectionState::transition`] and [`ListenerState::transition`]
//! instead of assigning states directly so every platform rejects the same operations.

use core::fmt::{Display, Formatter};

use crate::error::StateError;

/// Lifecycle of a TCP connection.
///
/// ```text
/// Unconnected -> Connecting -> Connected -> Unconnected
///                     |
///                     +-> Unconnected (failed or cancelled connect)
/// any -> Disposed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No session; a connect may start.
    #[default]
    Unconnected,
    /// A connect is in progress.
    Connecting,
    /// A session is established.
    Connected,
    /// Resources are released; terminal.
    Disposed,
}

impl ConnectionState {
    /// Returns whether the transition table allows moving to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Unconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Unconnected)
                | (Connected, Unconnected)
                | (Unconnected | Connecting | Connected, Disposed)
        )
    }

    /// Checks that moving to `next` is allowed without moving.
    pub fn check(self, next: Self) -> Result<(), StateError> {
        if self.can_transition_to(next) {
            return Ok(());
        }
        Err(match (self, next) {
            (ConnectionState::Disposed, _) => StateError::Disposed,
            (ConnectionState::Connected, ConnectionState::Connecting) => {
                StateError::AlreadyConnected
            }
            (ConnectionState::Unconnected, ConnectionState::Unconnected) => {
                StateError::NotConnected
            }
            (from, to) => StateError::InvalidTransition {
                from: from.name(),
                to: to.name(),
            },
        })
    }

    /// Moves to `next` if the transition table allows it.
    pub fn transition(&mut self, next: Self) -> Result<(), StateError> {
        self.check(next)?;
        *self = next;
        Ok(())
    }

    fn name(self) -> &'static str {
        match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disposed => "disposed",
        }
    }
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle of a TCP listener.
///
/// ```text
/// Idle -> Listening -> Stopped -> Idle (reset)
/// any -> Disposed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ListenerState {
    /// Not yet started, or reset after a stop.
    #[default]
    Idle,
    /// Bound with a running accept loop.
    Listening,
    /// Stopped; needs a reset before listening again.
    Stopped,
    /// Resources are released; terminal.
    Disposed,
}

impl ListenerState {
    /// Returns whether the transition table allows moving to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ListenerState::*;

        matches!(
            (self, next),
            (Idle, Listening)
                | (Listening, Stopped)
                | (Stopped, Idle)
                | (Idle | Listening | Stopped, Disposed)
        )
    }

    /// Checks that moving to `next` is allowed without moving.
    pub fn check(self, next: Self) -> Result<(), StateError> {
        use ListenerState::*;

        if self.can_transition_to(next) {
            return Ok(());
        }
        Err(match (self, next) {
            (Disposed, _) => StateError::Disposed,
            (Listening, Listening) => StateError::AlreadyListening,
            (Stopped, Listening) => StateError::ListenerStopped,
            (Idle | Stopped, Stopped) => StateError::NotListening,
            (from, to) => StateError::InvalidTransition {
                from: from.name(),
                to: to.name(),
            },
        })
    }

    /// Moves to `next` if the transition table allows it.
    pub fn transition(&mut self, next: Self) -> Result<(), StateError> {
        self.check(next)?;
        *self = next;
        Ok(())
    }

    fn name(self) -> &'static str {
        match self {
            ListenerState::Idle => "idle",
            ListenerState::Listening => "listening",
            ListenerState::Stopped => "stopped",
            ListenerState::Disposed => "disposed",
        }
    }
}

impl Display for ListenerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
