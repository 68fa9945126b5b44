//! Session coordinator.
//!
//! [`Broker`] owns every piece of matching state: accepted connections, the
//! client registry, the interest index and the escalation timers. The
//! runtime feeds it [`BrokerEvent`]s and executes the [`BrokerAction`]s it
//! returns. It performs no I/O and never reads the clock except through its
//! [`Environment`].
//!
//! Every pairing transition goes through the private `pair` and `unpair`
//! helpers, which keep the interest index and escalation timers in step with
//! the registry.

use std::collections::HashSet;

use tandem_proto::{ClientId, ClientMessage, MatchKind, MatchType, ServerMessage};

use crate::{
    client::{PairingState, normalize_interests},
    env::Environment,
    error::BrokerError,
    escalation::{EscalationConfig, EscalationScheduler, EscalationStep},
    interest_index::InterestIndex,
    matcher,
    registry::ClientRegistry,
};

/// Broker configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Escalation timing for interest-mode clients
    pub escalation: EscalationConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { max_connections: 10_000, escalation: EscalationConfig::default() }
    }
}

/// Events the broker processes.
///
/// Produced by the runtime (production or simulation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// A new connection was accepted
    ConnectionAccepted {
        /// Handle assigned by the runtime
        client_id: ClientId,
    },

    /// A decoded frame arrived from a connection
    Inbound {
        /// Connection that sent the frame
        client_id: ClientId,
        /// Decoded message
        message: ClientMessage,
    },

    /// A connection was closed (by peer or error)
    ConnectionClosed {
        /// Connection that was closed
        client_id: ClientId,
        /// Reason for closure
        reason: String,
    },

    /// Escalation deadline reached
    Tick,
}

/// Actions the broker produces.
///
/// Executed by runtime-specific code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerAction<I> {
    /// Send a message to one client
    Emit {
        /// Recipient
        client_id: ClientId,
        /// Message to send
        message: ServerMessage,
    },

    /// Close a connection
    CloseConnection {
        /// Connection to close
        client_id: ClientId,
        /// Reason for closure
        reason: String,
    },

    /// Log a message (for debugging/monitoring)
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
        /// When the event occurred
        timestamp: I,
    },
}

/// Log levels for broker actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

/// Action-based matchmaking broker.
pub struct Broker<E: Environment> {
    /// Connections accepted and not yet closed
    connections: HashSet<ClientId>,
    /// Joined clients
    registry: ClientRegistry,
    /// Interest tag → waiting interest-mode clients
    index: InterestIndex,
    /// Escalation timers for searching clients
    escalation: EscalationScheduler<E::Instant>,
    /// Environment (time, RNG)
    env: E,
    /// Broker configuration
    config: BrokerConfig,
}

type Actions<E> = Vec<BrokerAction<<E as Environment>::Instant>>;

impl<E: Environment> Broker<E> {
    /// Create a new broker.
    pub fn new(env: E, config: BrokerConfig) -> Self {
        Self {
            connections: HashSet::new(),
            registry: ClientRegistry::new(),
            index: InterestIndex::new(),
            escalation: EscalationScheduler::new(config.escalation),
            env,
            config,
        }
    }

    /// Process an event and return actions to execute.
    ///
    /// This is the main entry point for the runtime.
    pub fn process_event(&mut self, event: BrokerEvent) -> Result<Actions<E>, BrokerError> {
        let actions = match event {
            BrokerEvent::ConnectionAccepted { client_id } => {
                Ok(self.handle_connection_accepted(client_id))
            },
            BrokerEvent::Inbound { client_id, message } => self.handle_inbound(client_id, message),
            BrokerEvent::ConnectionClosed { client_id, reason } => {
                self.handle_connection_closed(client_id, &reason)
            },
            BrokerEvent::Tick => self.on_tick(),
        }?;

        debug_assert_eq!(self.check_invariants(), Ok(()));
        Ok(actions)
    }

    fn handle_connection_accepted(&mut self, client_id: ClientId) -> Actions<E> {
        if self.connections.len() >= self.config.max_connections {
            return vec![
                BrokerAction::CloseConnection {
                    client_id,
                    reason: "max connections exceeded".to_string(),
                },
                self.log(
                    LogLevel::Warn,
                    format!("connection {client_id} rejected: max connections exceeded"),
                ),
            ];
        }

        if !self.connections.insert(client_id) {
            return vec![
                self.log(LogLevel::Debug, format!("connection {client_id} already accepted")),
            ];
        }

        vec![self.log(LogLevel::Info, format!("connection {client_id} accepted"))]
    }

    fn handle_inbound(
        &mut self,
        client_id: ClientId,
        message: ClientMessage,
    ) -> Result<Actions<E>, BrokerError> {
        if !self.connections.contains(&client_id) {
            return Ok(vec![self.log(
                LogLevel::Debug,
                format!("ignoring {} from unknown connection {client_id}", message.event_name()),
            )]);
        }

        match message {
            ClientMessage::Join(join) => self.on_join(client_id, join.interests, join.match_type),
            ClientMessage::Message(relay) => {
                Ok(self.on_message(client_id, relay.to, relay.message))
            },
            ClientMessage::DisconnectPartner(req) => {
                self.on_disconnect_partner(client_id, req.partner_id)
            },
            ClientMessage::FindNewPartner => self.on_find_new_partner(client_id),
        }
    }

    fn handle_connection_closed(
        &mut self,
        client_id: ClientId,
        reason: &str,
    ) -> Result<Actions<E>, BrokerError> {
        let was_open = self.connections.remove(&client_id);
        let mut actions = self.on_disconnect(client_id)?;

        if was_open {
            actions.push(self.log(
                LogLevel::Info,
                format!("connection {client_id} closed: {reason}"),
            ));
        }

        Ok(actions)
    }

    /// Register `id` and try to match it immediately.
    ///
    /// Re-joining drops the previous registration first, exactly as a
    /// disconnect would. With no match, an interest-mode client starts
    /// searching under escalation; a random-mode client waits unpaired.
    pub fn on_join(
        &mut self,
        id: ClientId,
        interests: Vec<String>,
        match_type: MatchType,
    ) -> Result<Actions<E>, BrokerError> {
        let mut actions = Vec::new();

        if self.registry.contains(id) {
            actions.extend(self.teardown(id)?);
            actions.push(
                self.log(LogLevel::Debug, format!("client {id} re-joined, previous state dropped")),
            );
        }

        let interests = normalize_interests(interests);
        self.registry.register(id, interests.clone(), match_type)?;
        if match_type == MatchType::Interest {
            self.index.add_all(&interests, id);
        }

        actions.push(self.log(
            LogLevel::Info,
            format!(
                "client {id} joined (match_type={}, interests=[{}])",
                MatchKind::from(match_type),
                interests.join(", ")
            ),
        ));

        match self.find_partner(id, &interests, match_type) {
            Some((partner, kind)) => actions.extend(self.pair(id, partner, kind)?),
            None if match_type == MatchType::Interest => {
                self.registry.set_searching(id)?;
                self.escalation.arm(id, self.env.now());
                actions.push(self.log(
                    LogLevel::Debug,
                    format!("no interest match for client {id}, escalation armed"),
                ));
            },
            None => {
                actions.push(
                    self.log(LogLevel::Debug, format!("client {id} waiting for a random partner")),
                );
            },
        }

        Ok(actions)
    }

    /// Relay `text` from `from` to `to` if they are paired with each other.
    ///
    /// Anything else is dropped without telling the sender.
    pub fn on_message(&mut self, from: ClientId, to: ClientId, text: String) -> Actions<E> {
        let paired = self.registry.get(to).ok().and_then(|client| client.partner()) == Some(from);

        if !paired {
            return vec![self.log(
                LogLevel::Debug,
                format!("dropped message from {from} to {to}: not partners"),
            )];
        }

        vec![
            BrokerAction::Emit { client_id: to, message: ServerMessage::message(from, text) },
            self.log(LogLevel::Debug, format!("relayed message {from} -> {to}")),
        ]
    }

    /// Drop every trace of `id`, notifying its partner if paired.
    ///
    /// Idempotent.
    pub fn on_disconnect(&mut self, id: ClientId) -> Result<Actions<E>, BrokerError> {
        let mut actions = self.teardown(id)?;
        if !actions.is_empty() {
            actions.push(self.log(LogLevel::Info, format!("client {id} left")));
        }
        Ok(actions)
    }

    /// End the pairing between `id` and `partner_id`, keeping both joined.
    ///
    /// No-op unless they are currently paired with each other.
    pub fn on_disconnect_partner(
        &mut self,
        id: ClientId,
        partner_id: ClientId,
    ) -> Result<Actions<E>, BrokerError> {
        let paired =
            self.registry.get(id).ok().and_then(|client| client.partner()) == Some(partner_id);

        if !paired {
            return Ok(vec![self.log(
                LogLevel::Debug,
                format!("ignored disconnectPartner from {id}: not paired with {partner_id}"),
            )]);
        }

        self.unpair(id)?;
        self.unpair(partner_id)?;

        Ok(vec![
            BrokerAction::Emit {
                client_id: partner_id,
                message: ServerMessage::partner_disconnected(),
            },
            self.log(LogLevel::Info, format!("client {id} ended pairing with {partner_id}")),
        ])
    }

    /// Re-run matching for an unpaired client under its declared policy.
    ///
    /// Paired and searching clients are left alone. A miss leaves the client
    /// unpaired without arming escalation.
    pub fn on_find_new_partner(&mut self, id: ClientId) -> Result<Actions<E>, BrokerError> {
        let Ok(client) = self.registry.get(id) else {
            return Ok(vec![self.log(
                LogLevel::Debug,
                format!("ignored findNewPartner from {id}: not joined"),
            )]);
        };

        if client.pairing != PairingState::Unpaired {
            return Ok(vec![self.log(
                LogLevel::Debug,
                format!("ignored findNewPartner from {id}: {:?}", client.pairing),
            )]);
        }

        let interests = client.interests.clone();
        let match_type = client.match_type;

        match self.find_partner(id, &interests, match_type) {
            Some((partner, kind)) => self.pair(id, partner, kind),
            None => Ok(vec![
                self.log(LogLevel::Debug, format!("no partner available for client {id}")),
            ]),
        }
    }

    /// Run every escalation step that is due.
    pub fn on_tick(&mut self) -> Result<Actions<E>, BrokerError> {
        let now = self.env.now();
        let mut actions = Vec::new();

        for (id, step) in self.escalation.due(now) {
            match step {
                EscalationStep::Broaden => actions.extend(self.broaden(id)?),
                EscalationStep::Expire => actions.extend(self.expire(id)),
            }
        }

        Ok(actions)
    }

    /// When the next escalation step falls due.
    pub fn next_deadline(&self) -> Option<E::Instant> {
        self.escalation.next_deadline()
    }

    /// Check every cross-structure invariant.
    ///
    /// - Pairing is symmetric
    /// - Index members are registered, interest-mode, unpaired and advertise
    ///   the tag
    /// - Every unpaired interest-mode client is indexed under all its tags
    /// - Exactly the searching clients are armed
    pub fn check_invariants(&self) -> Result<(), BrokerError> {
        for client in self.registry.iter() {
            let id = client.id;

            if let Some(partner) = client.partner() {
                let back = self.registry.get(partner).ok().and_then(|p| p.partner());
                if back != Some(id) {
                    return Err(BrokerError::InvariantViolation(format!(
                        "client {id} paired with {partner}, which points at {back:?}"
                    )));
                }
            }

            if client.is_interest_mode() && client.is_available() {
                if let Some(tag) = client.interests.iter().find(|tag| !self.index.contains(tag, id))
                {
                    return Err(BrokerError::InvariantViolation(format!(
                        "unpaired client {id} missing from index under {tag:?}"
                    )));
                }
            }

            let searching = client.pairing == PairingState::Searching;
            if searching != self.escalation.is_armed(id) {
                return Err(BrokerError::InvariantViolation(format!(
                    "client {id} is {:?} but armed={}",
                    client.pairing,
                    self.escalation.is_armed(id)
                )));
            }
        }

        for (tag, id) in self.index.memberships() {
            let valid = self.registry.get(id).is_ok_and(|client| {
                client.is_interest_mode()
                    && client.is_available()
                    && client.interests.iter().any(|t| t == tag)
            });
            if !valid {
                return Err(BrokerError::InvariantViolation(format!(
                    "index holds stale entry {id} under {tag:?}"
                )));
            }
        }

        if let Some(id) = self.escalation.armed().find(|id| !self.registry.contains(*id)) {
            return Err(BrokerError::InvariantViolation(format!(
                "escalation armed for unregistered client {id}"
            )));
        }

        Ok(())
    }

    /// Registered clients.
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Interest index.
    pub fn index(&self) -> &InterestIndex {
        &self.index
    }

    /// Escalation timers.
    pub fn escalation(&self) -> &EscalationScheduler<E::Instant> {
        &self.escalation
    }

    /// Configuration in use.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Environment in use.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of joined clients.
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    fn find_partner(
        &self,
        id: ClientId,
        interests: &[String],
        match_type: MatchType,
    ) -> Option<(ClientId, MatchKind)> {
        match match_type {
            MatchType::Interest => {
                matcher::find_interest_match(&self.registry, &self.index, id, interests)
                    .map(|partner| (partner, MatchKind::Interest))
            },
            MatchType::Random => matcher::find_random_match(&self.registry, id, &self.env)
                .map(|partner| (partner, MatchKind::Random)),
        }
    }

    /// Pair `a` with `b` and notify both, `a` first.
    fn pair(
        &mut self,
        a: ClientId,
        b: ClientId,
        kind: MatchKind,
    ) -> Result<Actions<E>, BrokerError> {
        self.registry.set_paired(a, b)?;

        for id in [a, b] {
            self.escalation.cancel(id);
            let client = self.registry.get(id)?;
            self.index.remove_all(&client.interests, id);
        }

        let a_interests = &self.registry.get(a)?.interests;
        let b_interests = &self.registry.get(b)?.interests;
        let (a_common, b_common) = if kind == MatchKind::Interest {
            (
                matcher::common_interests(a_interests, b_interests),
                matcher::common_interests(b_interests, a_interests),
            )
        } else {
            (Vec::new(), Vec::new())
        };

        Ok(vec![
            BrokerAction::Emit { client_id: a, message: ServerMessage::matched(b, kind, a_common) },
            BrokerAction::Emit { client_id: b, message: ServerMessage::matched(a, kind, b_common) },
            self.log(LogLevel::Info, format!("paired {a} with {b} ({kind})")),
        ])
    }

    /// Clear the pairing of `id` only, returning it to the index if it
    /// declared interest mode.
    fn unpair(&mut self, id: ClientId) -> Result<Option<ClientId>, BrokerError> {
        let previous = self.registry.set_unpaired(id)?;

        let client = self.registry.get(id)?;
        if client.is_interest_mode() {
            self.index.add_all(&client.interests, id);
        }

        Ok(previous)
    }

    /// Remove `id` from every structure. Empty when `id` was not joined.
    fn teardown(&mut self, id: ClientId) -> Result<Actions<E>, BrokerError> {
        let Some(client) = self.registry.remove(id) else {
            return Ok(Vec::new());
        };

        self.escalation.cancel(id);
        self.index.remove_all(&client.interests, id);

        let mut actions = vec![self.log(LogLevel::Debug, format!("client {id} unregistered"))];

        if let Some(partner) = client.partner().filter(|p| self.registry.contains(*p)) {
            self.unpair(partner)?;
            actions.push(BrokerAction::Emit {
                client_id: partner,
                message: ServerMessage::partner_disconnected(),
            });
            actions.push(self.log(
                LogLevel::Info,
                format!("client {partner} lost partner {id}"),
            ));
        }

        Ok(actions)
    }

    /// Widen the search for `id`: different interests first, then anyone.
    fn broaden(&mut self, id: ClientId) -> Result<Actions<E>, BrokerError> {
        let Some(client) = self.registry.get(id).ok().filter(|c| c.is_available()) else {
            return Ok(Vec::new());
        };
        let interests = client.interests.clone();

        let found = matcher::find_different_interest_match(&self.registry, id, &interests)
            .map(|partner| (partner, MatchKind::Different))
            .or_else(|| {
                matcher::find_random_match(&self.registry, id, &self.env)
                    .map(|partner| (partner, MatchKind::Random))
            });

        match found {
            Some((partner, kind)) => {
                let mut actions = vec![
                    self.log(LogLevel::Debug, format!("search broadened for client {id}")),
                ];
                actions.extend(self.pair(id, partner, kind)?);
                Ok(actions)
            },
            None => Ok(vec![self.log(
                LogLevel::Debug,
                format!("search broadened for client {id}, still no partner"),
            )]),
        }
    }

    /// Give up on `id`: unregister it and tell it so.
    fn expire(&mut self, id: ClientId) -> Actions<E> {
        if self.registry.get(id).is_ok_and(|c| c.is_paired()) {
            return Vec::new();
        }

        let Some(client) = self.registry.remove(id) else {
            return Vec::new();
        };

        self.escalation.cancel(id);
        self.index.remove_all(&client.interests, id);

        vec![
            BrokerAction::Emit { client_id: id, message: ServerMessage::no_match_found() },
            self.log(LogLevel::Info, format!("no match found for client {id}, search expired")),
        ]
    }

    fn log(&self, level: LogLevel, message: String) -> BrokerAction<E::Instant> {
        BrokerAction::Log { level, message, timestamp: self.env.now() }
    }
}
