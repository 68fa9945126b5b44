//! In-process broker driver for simulation tests.
//!
//! `SimBroker` plays the role of the production runtime without sockets:
//! it assigns connection ids, feeds [`BrokerEvent`]s to a [`Broker`] running
//! on [`SimEnv`] and executes the returned actions by recording them. Each
//! connection gets an outbox of the messages the broker emitted to it.
//! Client messages travel through the JSON codec exactly as they would over a
//! socket, so a frame the codec rejects earns the generic `error` notice.
//!
//! Time only moves through [`SimBroker::advance`], which fires every
//! escalation deadline in the window at its exact virtual instant.

use std::{collections::HashMap, time::Duration};

use tandem_core::{
    Broker, BrokerAction, BrokerConfig, BrokerError, BrokerEvent, Environment, LogLevel,
};
use tandem_proto::{
    ClientId, ClientMessage, DEFAULT_MAX_FRAME_LEN, DisconnectPartnerRequest,
    GENERIC_ERROR_DESCRIPTION, JoinRequest, MatchType, RelayRequest, ServerMessage,
};

use crate::{
    SimEnv,
    invariants::{InvariantRegistry, SystemSnapshot, Violation},
};

/// Simulated broker runtime.
pub struct SimBroker {
    broker: Broker<SimEnv>,
    env: SimEnv,
    /// Messages emitted per connection, oldest first
    outboxes: HashMap<ClientId, Vec<ServerMessage>>,
    /// Connections the broker asked to close, with the reason
    closed: HashMap<ClientId, String>,
    /// Every log action, in order
    logs: Vec<(LogLevel, String)>,
    next_id: u64,
}

impl SimBroker {
    /// Simulation with the default config.
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, BrokerConfig::default())
    }

    /// Simulation with a custom config.
    pub fn with_config(seed: u64, config: BrokerConfig) -> Self {
        let env = SimEnv::with_seed(seed);
        Self {
            broker: Broker::new(env.clone(), config),
            env,
            outboxes: HashMap::new(),
            closed: HashMap::new(),
            logs: Vec::new(),
            next_id: 1,
        }
    }

    /// Open a connection and return its id.
    pub fn connect(&mut self) -> Result<ClientId, BrokerError> {
        let client_id = ClientId(self.next_id);
        self.next_id += 1;

        self.outboxes.insert(client_id, Vec::new());
        self.process(BrokerEvent::ConnectionAccepted { client_id })?;
        Ok(client_id)
    }

    /// Encode `message` and deliver it as a text frame from `client_id`.
    pub fn send(&mut self, client_id: ClientId, message: ClientMessage) -> Result<(), BrokerError> {
        match message.encode() {
            Ok(frame) => self.send_frame(client_id, &frame),
            Err(e) => {
                tracing::error!("failed to encode {}: {}", message.event_name(), e);
                Ok(())
            },
        }
    }

    /// Deliver a raw text frame from `client_id`.
    ///
    /// Frames the codec rejects never reach the broker.
    pub fn send_frame(&mut self, client_id: ClientId, frame: &str) -> Result<(), BrokerError> {
        match ClientMessage::decode(frame, DEFAULT_MAX_FRAME_LEN) {
            Ok(message) => self.process(BrokerEvent::Inbound { client_id, message }),
            Err(e) => {
                tracing::debug!("rejected frame from {}: {}", client_id, e);
                let notice = ServerMessage::error(GENERIC_ERROR_DESCRIPTION);
                self.outboxes.entry(client_id).or_default().push(notice);
                Ok(())
            },
        }
    }

    /// `join` with the given tags.
    pub fn join(
        &mut self,
        client_id: ClientId,
        interests: &[&str],
        match_type: MatchType,
    ) -> Result<(), BrokerError> {
        let interests = interests.iter().map(|tag| tag.to_string()).collect();
        self.send(client_id, ClientMessage::Join(JoinRequest { interests, match_type }))
    }

    /// `message` from `from` addressed to `to`.
    pub fn message(&mut self, from: ClientId, to: ClientId, text: &str) -> Result<(), BrokerError> {
        let request = RelayRequest { message: text.to_string(), to };
        self.send(from, ClientMessage::Message(request))
    }

    /// `disconnectPartner` naming `partner_id`.
    pub fn disconnect_partner(
        &mut self,
        client_id: ClientId,
        partner_id: ClientId,
    ) -> Result<(), BrokerError> {
        let request = DisconnectPartnerRequest { partner_id };
        self.send(client_id, ClientMessage::DisconnectPartner(request))
    }

    /// `findNewPartner`.
    pub fn find_new_partner(&mut self, client_id: ClientId) -> Result<(), BrokerError> {
        self.send(client_id, ClientMessage::FindNewPartner)
    }

    /// Close the connection from the client side.
    pub fn disconnect(&mut self, client_id: ClientId) -> Result<(), BrokerError> {
        self.process(BrokerEvent::ConnectionClosed {
            client_id,
            reason: "closed by peer".to_string(),
        })
    }

    /// Advance virtual time by `by`, firing each deadline on the way.
    pub fn advance(&mut self, by: Duration) -> Result<(), BrokerError> {
        let target = self.env.now() + by;

        while let Some(deadline) = self.broker.next_deadline().filter(|d| *d <= target) {
            let now = self.env.now();
            if deadline > now {
                self.env.advance(deadline - now);
            }
            self.process(BrokerEvent::Tick)?;
        }

        let now = self.env.now();
        if target > now {
            self.env.advance(target - now);
        }
        Ok(())
    }

    /// Drain the messages emitted to `client_id` so far.
    pub fn take_messages(&mut self, client_id: ClientId) -> Vec<ServerMessage> {
        self.outboxes.get_mut(&client_id).map(std::mem::take).unwrap_or_default()
    }

    /// Messages emitted to `client_id` and not yet taken.
    pub fn messages(&self, client_id: ClientId) -> &[ServerMessage] {
        self.outboxes.get(&client_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Reason the broker closed `client_id`, if it did.
    pub fn close_reason(&self, client_id: ClientId) -> Option<&str> {
        self.closed.get(&client_id).map(String::as_str)
    }

    /// Log actions recorded so far.
    pub fn logs(&self) -> &[(LogLevel, String)] {
        &self.logs
    }

    /// Underlying broker.
    pub fn broker(&self) -> &Broker<SimEnv> {
        &self.broker
    }

    /// Shared environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Current observable state.
    pub fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot::from_broker(&self.broker)
    }

    /// Run `registry` against the current state.
    pub fn check(&self, registry: &InvariantRegistry) -> Result<(), Vec<Violation>> {
        registry.check_all(&self.snapshot())
    }

    fn process(&mut self, event: BrokerEvent) -> Result<(), BrokerError> {
        let actions = self.broker.process_event(event)?;
        for action in actions {
            self.execute(action);
        }
        Ok(())
    }

    fn execute(&mut self, action: BrokerAction<<SimEnv as Environment>::Instant>) {
        match action {
            BrokerAction::Emit { client_id, message } => {
                if self.closed.contains_key(&client_id) {
                    let event = message.event_name();
                    tracing::warn!("dropping {} for closed connection {}", event, client_id);
                    return;
                }
                self.outboxes.entry(client_id).or_default().push(message);
            },
            BrokerAction::CloseConnection { client_id, reason } => {
                self.closed.insert(client_id, reason);
            },
            BrokerAction::Log { level, message, timestamp } => {
                match level {
                    LogLevel::Debug => tracing::debug!("[{:?}] {}", timestamp, message),
                    LogLevel::Info => tracing::info!("[{:?}] {}", timestamp, message),
                    LogLevel::Warn => tracing::warn!("[{:?}] {}", timestamp, message),
                    LogLevel::Error => tracing::error!("[{:?}] {}", timestamp, message),
                }
                self.logs.push((level, message));
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_sequential() {
        let mut sim = SimBroker::new(0);

        assert_eq!(sim.connect().unwrap(), ClientId(1));
        assert_eq!(sim.connect().unwrap(), ClientId(2));
        assert_eq!(sim.broker().connection_count(), 2);
    }

    #[test]
    fn advance_fires_deadlines_at_their_instant() {
        let mut sim = SimBroker::new(0);
        let a = sim.connect().unwrap();
        sim.join(a, &["chess"], MatchType::Interest).unwrap();

        sim.advance(Duration::from_secs(30)).unwrap();

        assert_eq!(sim.env().now().elapsed(), Duration::from_secs(30));
        assert_eq!(sim.take_messages(a), vec![ServerMessage::no_match_found()]);
        assert!(sim.messages(a).is_empty());
    }

    #[test]
    fn rejected_frame_earns_generic_error_only() {
        let mut sim = SimBroker::new(0);
        let a = sim.connect().unwrap();

        sim.send_frame(a, r#"{"event":"join","data":{"interests":"chess"}}"#).unwrap();
        sim.send_frame(a, "not json").unwrap();

        let generic = ServerMessage::error(GENERIC_ERROR_DESCRIPTION);
        assert_eq!(sim.take_messages(a), vec![generic.clone(), generic]);
        assert_eq!(sim.broker().client_count(), 0);

        sim.send_frame(a, r#"{"event":"join","data":{"interests":[],"matchType":"random"}}"#)
            .unwrap();
        assert_eq!(sim.broker().client_count(), 1);
        assert!(sim.messages(a).is_empty());
    }

    #[test]
    fn over_limit_connection_is_closed() {
        let config = BrokerConfig { max_connections: 1, ..BrokerConfig::default() };
        let mut sim = SimBroker::with_config(0, config);

        let first = sim.connect().unwrap();
        let second = sim.connect().unwrap();

        assert_eq!(sim.close_reason(first), None);
        assert!(sim.close_reason(second).is_some());
        assert!(sim.logs().iter().any(|(level, _)| *level == LogLevel::Warn));
    }
}
