//! Connection lifecycle state machine (RFC 6455 Sections 4, 7).

use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame};

/// WebSocket connection state.
///
/// Represents the lifecycle states of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Transport connect or opening handshake in progress.
    #[default]
    Connecting,
    /// Connection is open and ready for data transfer.
    Open,
    /// We sent a close frame and wait for the peer's.
    ClosingLocal,
    /// The peer sent a close frame; ours is being echoed.
    ClosingRemote,
    /// Connection is fully closed.
    Closed,
}

impl ConnectionState {
    /// Check if the connection is in an active state.
    ///
    /// Returns `true` for every state but `Closed`.
    #[must_use]
    #[inline]
    pub const fn is_active(&self) -> bool {
        !matches!(self, ConnectionState::Closed)
    }

    /// Check if sending data is allowed in this state.
    ///
    /// Returns `true` only for `Open` state.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Check if inbound frames are still read in this state.
    #[must_use]
    #[inline]
    pub const fn can_receive(&self) -> bool {
        matches!(
            self,
            ConnectionState::Open | ConnectionState::ClosingLocal | ConnectionState::ClosingRemote
        )
    }

    /// Either side has started the closing handshake.
    #[must_use]
    #[inline]
    pub const fn is_closing(&self) -> bool {
        matches!(
            self,
            ConnectionState::ClosingLocal | ConnectionState::ClosingRemote
        )
    }

    /// Whether `self -> to` is a legal transition.
    ///
    /// Any active state may drop straight to `Closed` (transport failure).
    #[must_use]
    pub const fn can_transition_to(&self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Connecting, Open)
                | (Open, ClosingLocal)
                | (Open, ClosingRemote)
                | (Connecting | Open | ClosingLocal | ClosingRemote, Closed)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::ClosingLocal => write!(f, "ClosingLocal"),
            ConnectionState::ClosingRemote => write!(f, "ClosingRemote"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Current state plus the close status recorded on reaching `Closed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateMachine {
    state: ConnectionState,
    close_frame: Option<CloseFrame>,
}

impl StateMachine {
    /// Machine in `Connecting`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Close status, set once the machine is `Closed`.
    #[must_use]
    pub fn close_frame(&self) -> Option<&CloseFrame> {
        self.close_frame.as_ref()
    }

    /// Move to `to`.
    ///
    /// Moving to `Closed` this way records an abnormal closure (1006); use
    /// [`close`](Self::close) to record a specific status.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` and leaves the state unchanged if
    /// the transition is not allowed.
    pub fn transition(&mut self, to: ConnectionState) -> Result<()> {
        if to == ConnectionState::Closed {
            return self.close(CloseFrame::new(CloseCode::Abnormal, ""));
        }
        self.check(to)?;
        self.state = to;
        Ok(())
    }

    /// Move to `Closed`, recording `frame` as the close status.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` if already `Closed`.
    pub fn close(&mut self, frame: CloseFrame) -> Result<()> {
        self.check(ConnectionState::Closed)?;
        self.state = ConnectionState::Closed;
        self.close_frame = Some(frame);
        Ok(())
    }

    fn check(&self, to: ConnectionState) -> Result<()> {
        if self.state.can_transition_to(to) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.state,
                to,
            })
        }
    }
}
