//! Client registry.
//!
//! Maps connection ids to [`Client`] state. Pairing is symmetric, so
//! [`ClientRegistry::set_paired`] validates both sides before touching either:
//! a failed call leaves the registry exactly as it was.
//!
//! Iteration is in ascending id order. The runtime allocates ids
//! monotonically, which makes this join order and keeps scans deterministic.

use std::collections::BTreeMap;

use tandem_proto::{ClientId, MatchType};

use crate::{
    client::{Client, PairingState},
    error::BrokerError,
};

/// Registry of joined clients.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    /// Client ID → client state
    clients: BTreeMap<ClientId, Client>,
}

impl ClientRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client in [`PairingState::Unpaired`].
    ///
    /// Fails with [`BrokerError::DuplicateClient`] if the id is present; the
    /// existing entry is left untouched.
    pub fn register(
        &mut self,
        id: ClientId,
        interests: Vec<String>,
        match_type: MatchType,
    ) -> Result<&Client, BrokerError> {
        if self.clients.contains_key(&id) {
            return Err(BrokerError::DuplicateClient(id));
        }

        Ok(self.clients.entry(id).or_insert_with(|| Client::new(id, interests, match_type)))
    }

    /// Client state, or [`BrokerError::NotFound`].
    pub fn get(&self, id: ClientId) -> Result<&Client, BrokerError> {
        self.clients.get(&id).ok_or(BrokerError::NotFound(id))
    }

    /// Check if a client is registered.
    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Remove a client. Returns the removed state; `None` if it was absent.
    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        self.clients.remove(&id)
    }

    /// Pair two clients with each other.
    ///
    /// Both must exist, be distinct, and be unpaired.
    pub fn set_paired(&mut self, a: ClientId, b: ClientId) -> Result<(), BrokerError> {
        if a == b {
            return Err(BrokerError::InvariantViolation(format!("client {a} paired with itself")));
        }

        for id in [a, b] {
            if let Some(partner) = self.get(id)?.partner() {
                return Err(BrokerError::InvariantViolation(format!(
                    "client {id} is already paired with {partner}"
                )));
            }
        }

        for (id, partner) in [(a, b), (b, a)] {
            if let Some(client) = self.clients.get_mut(&id) {
                client.pairing = PairingState::Paired(partner);
            }
        }

        Ok(())
    }

    /// Clear pairing for `id` only. Returns the previous partner, if any.
    ///
    /// The partner's entry is not touched; the caller unpairs and notifies it
    /// separately.
    pub fn set_unpaired(&mut self, id: ClientId) -> Result<Option<ClientId>, BrokerError> {
        let client = self.clients.get_mut(&id).ok_or(BrokerError::NotFound(id))?;
        let previous = client.partner();
        client.pairing = PairingState::Unpaired;
        Ok(previous)
    }

    /// Move an unpaired client to [`PairingState::Searching`].
    pub fn set_searching(&mut self, id: ClientId) -> Result<(), BrokerError> {
        let client = self.clients.get_mut(&id).ok_or(BrokerError::NotFound(id))?;
        if let PairingState::Paired(partner) = client.pairing {
            return Err(BrokerError::InvariantViolation(format!(
                "client {id} cannot search while paired with {partner}"
            )));
        }

        client.pairing = PairingState::Searching;
        Ok(())
    }

    /// All clients in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Client> + '_ {
        self.clients.values()
    }

    /// All client ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.clients.keys().copied()
    }

    /// Total number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// No clients registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
