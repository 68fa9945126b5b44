//! Observable state snapshots for invariant checking.
//!
//! Snapshots copy the broker's state out at a point in time, so checks run
//! against one consistent view and can also be built by hand in tests.

use std::collections::{BTreeMap, BTreeSet};

use tandem_core::{Broker, Environment, PairingState};
use tandem_proto::{ClientId, MatchType};

/// Snapshot of the whole broker.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Registered clients, in id order.
    pub clients: Vec<ClientSnapshot>,
    /// Interest index: tag → waiting client ids.
    pub buckets: BTreeMap<String, BTreeSet<ClientId>>,
    /// Clients with an escalation timer armed.
    pub armed: BTreeSet<ClientId>,
}

impl SystemSnapshot {
    /// Snapshot with no clients.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Copy the observable state out of `broker`.
    pub fn from_broker<E: Environment>(broker: &Broker<E>) -> Self {
        let clients = broker
            .registry()
            .iter()
            .map(|client| ClientSnapshot {
                id: client.id,
                interests: client.interests.clone(),
                match_type: client.match_type,
                pairing: client.pairing,
            })
            .collect();

        let mut buckets: BTreeMap<String, BTreeSet<ClientId>> = BTreeMap::new();
        for (tag, id) in broker.index().memberships() {
            buckets.entry(tag.to_string()).or_default().insert(id);
        }

        let armed = broker.escalation().armed().collect();

        Self { clients, buckets, armed }
    }

    /// Add a client.
    pub fn with_client(mut self, client: ClientSnapshot) -> Self {
        self.clients.push(client);
        self
    }

    /// Put `id` in the bucket for `tag`.
    pub fn with_bucket_entry(mut self, tag: &str, id: ClientId) -> Self {
        self.buckets.entry(tag.to_string()).or_default().insert(id);
        self
    }

    /// Mark `id` as armed.
    pub fn with_armed(mut self, id: ClientId) -> Self {
        self.armed.insert(id);
        self
    }

    /// Client with the given id.
    pub fn client(&self, id: ClientId) -> Option<&ClientSnapshot> {
        self.clients.iter().find(|client| client.id == id)
    }

    /// Whether `id` sits in any bucket.
    pub fn is_indexed(&self, id: ClientId) -> bool {
        self.buckets.values().any(|members| members.contains(&id))
    }
}

/// Snapshot of one registered client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSnapshot {
    /// Client id
    pub id: ClientId,
    /// Normalized interest tags
    pub interests: Vec<String>,
    /// Declared match type
    pub match_type: MatchType,
    /// Pairing state
    pub pairing: PairingState,
}

impl ClientSnapshot {
    /// Unpaired client with no interests.
    pub fn new(id: u64, match_type: MatchType) -> Self {
        Self {
            id: ClientId(id),
            interests: Vec::new(),
            match_type,
            pairing: PairingState::Unpaired,
        }
    }

    /// Set interests.
    pub fn with_interests(mut self, interests: &[&str]) -> Self {
        self.interests = interests.iter().map(|tag| tag.to_string()).collect();
        self
    }

    /// Set pairing state.
    pub fn with_pairing(mut self, pairing: PairingState) -> Self {
        self.pairing = pairing;
        self
    }

    /// Paired with someone.
    pub fn partner(&self) -> Option<ClientId> {
        match self.pairing {
            PairingState::Paired(partner) => Some(partner),
            _ => None,
        }
    }
}
