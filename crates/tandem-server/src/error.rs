//! Server error types.

use std::fmt;

use tandem_core::BrokerError;
use tandem_proto::ProtocolError;

/// Errors that can occur in the server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, inconsistent timing, etc.).
    ///
    /// These are fatal errors that prevent server startup. Fix configuration
    /// and restart.
    Config(String),

    /// Transport/network error (bind failure, handshake failure, I/O error).
    ///
    /// May be transient (one bad connection) or fatal (bind address in use).
    Transport(String),

    /// Protocol error (malformed frame, oversized frame, encode failure).
    ///
    /// A client sent something the codec rejects. The client is told and the
    /// connection stays open.
    Protocol(String),

    /// Internal error (broker task gone, channel closed unexpectedly).
    ///
    /// Should never happen in correct implementation. Indicates a bug.
    Internal(String),

    /// Broker error (from `Broker` processing).
    ///
    /// Wraps errors from the matchmaking core. See `BrokerError` for details.
    Broker(BrokerError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::Broker(err) => write!(f, "broker error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Broker(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BrokerError> for ServerError {
    fn from(err: BrokerError) -> Self {
        Self::Broker(err)
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ServerError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
