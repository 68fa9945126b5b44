//! Per-connection client state.

use tandem_proto::{ClientId, MatchType};

/// Where a client is in the matching lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    /// Registered, not paired, no escalation pending
    Unpaired,
    /// Interest-mode client waiting on escalation
    Searching,
    /// In a chat with the given partner
    Paired(ClientId),
}

/// A joined client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Connection handle
    pub id: ClientId,
    /// Interest tags in declaration order, without duplicates
    pub interests: Vec<String>,
    /// Declared matching preference
    pub match_type: MatchType,
    /// Current pairing state
    pub pairing: PairingState,
}

impl Client {
    /// New client in [`PairingState::Unpaired`].
    pub fn new(id: ClientId, interests: Vec<String>, match_type: MatchType) -> Self {
        Self { id, interests, match_type, pairing: PairingState::Unpaired }
    }

    /// Current partner. `None` unless paired.
    pub fn partner(&self) -> Option<ClientId> {
        match self.pairing {
            PairingState::Paired(partner) => Some(partner),
            _ => None,
        }
    }

    /// Paired with someone.
    pub fn is_paired(&self) -> bool {
        matches!(self.pairing, PairingState::Paired(_))
    }

    /// Eligible as a match target (anything but paired).
    pub fn is_available(&self) -> bool {
        !self.is_paired()
    }

    /// Declared interest mode, so it belongs in the interest index while
    /// unpaired.
    pub fn is_interest_mode(&self) -> bool {
        self.match_type == MatchType::Interest
    }

    /// Shares at least one tag with `interests`.
    pub fn shares_interest_with(&self, interests: &[String]) -> bool {
        self.interests.iter().any(|tag| interests.contains(tag))
    }
}

/// Clean up client-supplied tags: trim, drop empties, keep the first
/// occurrence of each tag.
pub fn normalize_interests<I>(interests: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut normalized: Vec<String> = Vec::new();
    for tag in interests {
        let tag = tag.trim();
        if !tag.is_empty() && !normalized.iter().any(|seen| seen == tag) {
            normalized.push(tag.to_string());
        }
    }
    normalized
}
