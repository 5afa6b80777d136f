//! Server error types.

use std::io;
use std::time::Duration;

use parley_protocol::ProtocolError;
use thiserror::Error;
use tokio_util::codec::{AnyDelimiterCodecError, LinesCodecError};

use crate::connection::ConnectionState;

/// Errors raised while starting listeners.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that was requested.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// Socket error outside a connection.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors that end a single connection. Never escapes the connection's task.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The peer went away before finishing the handshake.
    #[error("connection closed during handshake")]
    ClosedDuringHandshake,

    /// A handshake or chat line exceeded the configured maximum.
    #[error("line exceeds the maximum length")]
    LineTooLong,

    /// No bytes arrived within the read deadline.
    #[error("no data received within {0:?}")]
    DeadlineElapsed(Duration),

    /// The connection was asked to make a state change it cannot make.
    #[error("invalid state transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// State before the attempted change.
        from: ConnectionState,
        /// Requested state.
        to: ConnectionState,
    },

    /// Malformed or unsupported WebSocket framing.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Socket error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<LinesCodecError> for SessionError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => Self::LineTooLong,
            LinesCodecError::Io(err) => Self::Io(err),
        }
    }
}

impl From<AnyDelimiterCodecError> for SessionError {
    fn from(err: AnyDelimiterCodecError) -> Self {
        match err {
            AnyDelimiterCodecError::MaxChunkLengthExceeded => Self::LineTooLong,
            AnyDelimiterCodecError::Io(err) => Self::Io(err),
        }
    }
}
