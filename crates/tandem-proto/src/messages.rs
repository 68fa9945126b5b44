//! Inbound and outbound event payloads.
//!
//! Inbound decoding goes through a loose envelope first so that events with
//! no payload (`findNewPartner`) may omit `data` entirely. Outbound messages
//! always carry a `data` object, empty when the event has no fields.

use serde::{Deserialize, Serialize};

use crate::{ClientId, MatchKind, MatchType, error::ProtocolError};

/// Payload of the `join` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// Interest tags in the order the client declared them.
    #[serde(default)]
    pub interests: Vec<String>,
    /// Matching preference. Missing means random.
    #[serde(default)]
    pub match_type: MatchType,
}

/// Payload of the inbound `message` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    /// Message text.
    pub message: String,
    /// Intended recipient (the sender's partner).
    pub to: ClientId,
}

/// Payload of the `disconnectPartner` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectPartnerRequest {
    /// Partner the sender wants to leave.
    pub partner_id: ClientId,
}

/// Events a client sends to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Register with interests and a matching preference.
    Join(JoinRequest),
    /// Relay text to the current partner.
    Message(RelayRequest),
    /// End the current pairing without leaving.
    DisconnectPartner(DisconnectPartnerRequest),
    /// Look for a new partner after being unpaired.
    FindNewPartner,
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl ClientMessage {
    /// Decode a text frame, enforcing `max_len` before parsing.
    pub fn decode(text: &str, max_len: usize) -> Result<Self, ProtocolError> {
        if text.len() > max_len {
            return Err(ProtocolError::FrameTooLarge { len: text.len(), max: max_len });
        }

        let envelope: Envelope = serde_json::from_str(text)?;
        match envelope.event.as_str() {
            "join" => Ok(Self::Join(serde_json::from_value(envelope.data)?)),
            "message" => Ok(Self::Message(serde_json::from_value(envelope.data)?)),
            "disconnectPartner" => {
                Ok(Self::DisconnectPartner(serde_json::from_value(envelope.data)?))
            },
            "findNewPartner" => Ok(Self::FindNewPartner),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire name of the event.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Message(_) => "message",
            Self::DisconnectPartner(_) => "disconnectPartner",
            Self::FindNewPartner => "findNewPartner",
        }
    }
}

/// Payload of the `matched` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedNotice {
    /// The new partner's handle.
    pub partner_id: ClientId,
    /// How the match was resolved.
    pub match_type: MatchKind,
    /// Shared interest tags. Empty unless interest-matched.
    pub common_interests: Vec<String>,
}

/// Payload of the outbound `message` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedMessage {
    /// Sender of the message.
    pub from: ClientId,
    /// Message text.
    pub message: String,
}

/// Payload of the `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotice {
    /// Human-readable description.
    pub description: String,
}

/// Events the broker sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// A partner was found.
    Matched(MatchedNotice),
    /// Text relayed from the partner.
    Message(RelayedMessage),
    /// The partner left or ended the pairing.
    PartnerDisconnected {},
    /// Escalation expired without a partner; the client was unregistered.
    NoMatchFound {},
    /// The last frame could not be processed.
    Error(ErrorNotice),
}

impl ServerMessage {
    /// `matched` notice.
    pub fn matched(
        partner_id: ClientId,
        match_type: MatchKind,
        common_interests: Vec<String>,
    ) -> Self {
        Self::Matched(MatchedNotice { partner_id, match_type, common_interests })
    }

    /// Relayed chat text.
    pub fn message(from: ClientId, message: impl Into<String>) -> Self {
        Self::Message(RelayedMessage { from, message: message.into() })
    }

    /// `partnerDisconnected` notice.
    pub fn partner_disconnected() -> Self {
        Self::PartnerDisconnected {}
    }

    /// `noMatchFound` notice.
    pub fn no_match_found() -> Self {
        Self::NoMatchFound {}
    }

    /// `error` notice.
    pub fn error(description: impl Into<String>) -> Self {
        Self::Error(ErrorNotice { description: description.into() })
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Wire name of the event.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Matched(_) => "matched",
            Self::Message(_) => "message",
            Self::PartnerDisconnected {} => "partnerDisconnected",
            Self::NoMatchFound {} => "noMatchFound",
            Self::Error(_) => "error",
        }
    }
}
