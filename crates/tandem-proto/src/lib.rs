//! Wire protocol for the Tandem matchmaking broker.
//!
//! Every frame is a JSON text message shaped as an event envelope:
//!
//! ```text
//! {"event": "<name>", "data": { ... }}
//! ```
//!
//! Inbound frames decode into [`ClientMessage`], outbound frames encode from
//! [`ServerMessage`]. Field names are camelCase on the wire.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;

use std::fmt;

pub use error::ProtocolError;
pub use messages::{
    ClientMessage, DisconnectPartnerRequest, ErrorNotice, JoinRequest, MatchedNotice,
    RelayRequest, RelayedMessage, ServerMessage,
};
use serde::{Deserialize, Serialize};

/// Largest inbound text frame accepted by default, in bytes.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Description sent to a client whose frame could not be processed.
pub const GENERIC_ERROR_DESCRIPTION: &str = "An error occurred. Please try reconnecting.";

/// Opaque handle for one client connection.
///
/// Assigned by the runtime when a connection is accepted. Serialized as a
/// bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ClientId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Matching preference declared by a client on join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Prefer partners sharing an interest tag, escalating over time.
    Interest,
    /// Any available partner.
    #[default]
    Random,
}

/// How a pairing was actually resolved, reported in `matched`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Partners share at least one interest tag.
    Interest,
    /// Uniformly random partner.
    Random,
    /// Broadened search found a partner with no shared interest.
    Different,
}

impl From<MatchType> for MatchKind {
    fn from(match_type: MatchType) -> Self {
        match match_type {
            MatchType::Interest => Self::Interest,
            MatchType::Random => Self::Random,
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Interest => "interest",
            Self::Random => "random",
            Self::Different => "different",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_is_a_bare_number() {
        let json = serde_json::to_string(&ClientId(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn match_type_uses_lowercase_names() {
        assert_eq!(serde_json::to_string(&MatchType::Interest).unwrap(), "\"interest\"");
        let parsed: MatchType = serde_json::from_str("\"random\"").unwrap();
        assert_eq!(parsed, MatchType::Random);
    }

    #[test]
    fn match_kind_resolves_from_preference() {
        assert_eq!(MatchKind::from(MatchType::Interest), MatchKind::Interest);
        assert_eq!(MatchKind::from(MatchType::Random), MatchKind::Random);
        assert_eq!(MatchKind::Different.to_string(), "different");
    }
}
