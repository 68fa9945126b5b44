//! Wire protocol errors.

use thiserror::Error;

/// Errors produced while decoding or encoding frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame is not valid JSON or does not match the event payload shape.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Envelope names an event this server does not handle.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// Frame exceeds the configured size limit.
    #[error("frame too large: {len} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Size of the received frame
        len: usize,
        /// Configured maximum
        max: usize,
    },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}
