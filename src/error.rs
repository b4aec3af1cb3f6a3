//! Error types for the WebSocket client.
//!
//! Fatal conditions (`Handshake`, `ProtocolViolation`, `ConnectionLost`) always
//! leave the connection `Closed`; `NotOpen` is recoverable.

use thiserror::Error;

use crate::connection::ConnectionState;
use crate::message::CloseFrame;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The opening handshake failed. The connection never opened.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The peer sent a malformed frame sequence.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The transport failed (reset, EOF, write error, liveness timeout).
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// A send was attempted while the connection is not `Open`.
    #[error("Connection is not open")]
    NotOpen,

    /// `connect()` was called while a session is still active.
    #[error("Client is already connected or connecting")]
    AlreadyConnected,

    /// The connection finished its closing handshake.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<CloseFrame>),

    /// A state transition not allowed by the lifecycle was requested.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// State before the attempted transition.
        from: ConnectionState,
        /// Requested state.
        to: ConnectionState,
    },

    /// An operation did not finish in its configured time.
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Invalid UTF-8 in a text message.
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: u64,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Too many fragments in a single message.
    #[error("Too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Actual fragment count.
        count: usize,
        /// Maximum allowed fragments.
        max: usize,
    },

    /// Handshake response head exceeds the configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes read so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Header value would break the request framing.
    #[error("Invalid value for header {header}: {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// I/O error that occurred outside an open session.
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid close code.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Masked frame received from the server.
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// Reserved bits set without a negotiated extension.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Invalid opcode value.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),
}

impl Error {
    /// Returns `true` for decode failures caused by a malformed frame.
    #[must_use]
    pub const fn is_frame_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidFrame(_)
                | Error::ReservedOpcode(_)
                | Error::InvalidOpcode(_)
                | Error::FragmentedControlFrame
                | Error::ControlFrameTooLarge(_)
                | Error::MaskedServerFrame
                | Error::ReservedBitsSet
                | Error::FrameTooLarge { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

impl From<getrandom::Error> for Error {
    fn from(err: getrandom::Error) -> Self {
        Error::Io(format!("random source unavailable: {err}"))
    }
}
