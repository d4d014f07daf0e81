use std::io;

use thiserror::Error;

use raven_chain::SerializationError;

/// Why a peer session ended, surfaced through
/// [`PeerEvents::disconnected`](super::PeerEvents::disconnected).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// The underlying transport failed.
    #[error("i/o error: {0:?}")]
    Io(io::ErrorKind),

    /// The remote end closed or reset the connection.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// A connect, handshake, per-message, or scheduled deadline passed.
    #[error("operation timed out")]
    Timeout,

    /// The remote peer violated the protocol; the session cannot continue.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// A message failed framing or payload parsing.
    #[error("malformed message: {0}")]
    Malformed(&'static str),

    /// A request was made on a peer with no live session.
    #[error("peer is not connected")]
    NotConnected,

    /// The owner reported the network unreachable.
    #[error("network is unreachable")]
    Unreachable,

    /// The owner asked for the session to be closed.
    #[error("connection closed")]
    Closed,
}

impl From<io::Error> for PeerError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => PeerError::Timeout,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => PeerError::ConnectionReset,
            kind => PeerError::Io(kind),
        }
    }
}

impl From<SerializationError> for PeerError {
    fn from(error: SerializationError) -> Self {
        match error {
            SerializationError::Io(io_error) => io_error.into(),
            SerializationError::Parse(message) => PeerError::Malformed(message),
        }
    }
}
