//! Property-based tests for the broker.
//!
//! Drives the broker directly (no connection layer) with arbitrary operation
//! sequences and checks its own cross-structure invariants after each step.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use proptest::prelude::*;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tandem_core::{Broker, BrokerAction, BrokerConfig, Environment, PairingState};
use tandem_proto::{ClientId, MatchType, ServerMessage};

#[derive(Clone)]
struct ManualEnv {
    clock: Arc<Mutex<Duration>>,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl ManualEnv {
    fn new(seed: u64) -> Self {
        Self {
            clock: Arc::new(Mutex::new(Duration::ZERO)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    fn advance(&self, by: Duration) {
        *self.clock.lock().unwrap() += by;
    }
}

impl Environment for ManualEnv {
    type Instant = Duration;

    fn now(&self) -> Duration {
        *self.clock.lock().unwrap()
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap().fill_bytes(buffer);
    }
}

#[derive(Debug, Clone)]
enum Op {
    Join { id: u64, interests: Vec<String>, interest_mode: bool },
    Message { from: u64, to: u64 },
    Disconnect(u64),
    DisconnectPartner { id: u64, partner: u64 },
    FindNewPartner(u64),
    Advance(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let id = 0u64..6;
    let tag = prop::sample::select(vec!["chess", "go", "art", "jazz"]).prop_map(str::to_string);
    prop_oneof![
        4 => (id.clone(), prop::collection::vec(tag, 0..3), any::<bool>())
            .prop_map(|(id, interests, interest_mode)| Op::Join { id, interests, interest_mode }),
        2 => (id.clone(), id.clone()).prop_map(|(from, to)| Op::Message { from, to }),
        1 => id.clone().prop_map(Op::Disconnect),
        1 => (id.clone(), id.clone()).prop_map(|(id, partner)| Op::DisconnectPartner { id, partner }),
        1 => id.prop_map(Op::FindNewPartner),
        2 => (1u64..6).prop_map(Op::Advance),
    ]
}

fn apply(broker: &mut Broker<ManualEnv>, env: &ManualEnv, op: &Op) -> Vec<BrokerAction<Duration>> {
    let result = match op {
        Op::Join { id, interests, interest_mode } => {
            let match_type = if *interest_mode { MatchType::Interest } else { MatchType::Random };
            broker.on_join(ClientId(*id), interests.clone(), match_type)
        },
        Op::Message { from, to } => {
            Ok(broker.on_message(ClientId(*from), ClientId(*to), "hello".to_string()))
        },
        Op::Disconnect(id) => broker.on_disconnect(ClientId(*id)),
        Op::DisconnectPartner { id, partner } => {
            broker.on_disconnect_partner(ClientId(*id), ClientId(*partner))
        },
        Op::FindNewPartner(id) => broker.on_find_new_partner(ClientId(*id)),
        Op::Advance(secs) => {
            env.advance(Duration::from_secs(*secs));
            broker.on_tick()
        },
    };
    result.unwrap()
}

proptest! {
    /// Broker invariants hold under arbitrary operation sequences.
    #[test]
    fn prop_broker_invariants_hold(
        seed in any::<u64>(),
        ops in prop::collection::vec(op_strategy(), 0..60),
    ) {
        let env = ManualEnv::new(seed);
        let mut broker = Broker::new(env.clone(), BrokerConfig::default());

        for op in &ops {
            apply(&mut broker, &env, op);
            prop_assert_eq!(broker.check_invariants(), Ok(()), "after {:?}", op);
        }
    }

    /// Relayed messages only ever travel between current partners.
    #[test]
    fn prop_messages_only_reach_partners(
        seed in any::<u64>(),
        ops in prop::collection::vec(op_strategy(), 0..60),
    ) {
        let env = ManualEnv::new(seed);
        let mut broker = Broker::new(env.clone(), BrokerConfig::default());

        for op in &ops {
            let actions = apply(&mut broker, &env, op);
            for action in actions {
                if let BrokerAction::Emit { client_id, message: ServerMessage::Message(relayed) } =
                    action
                {
                    let partner = broker.registry().get(client_id).ok().and_then(|c| c.partner());
                    prop_assert_eq!(partner, Some(relayed.from));
                }
            }
        }
    }

    /// A random-mode join pairs immediately whenever anyone is unpaired.
    #[test]
    fn prop_random_join_matches_when_anyone_waits(
        seed in any::<u64>(),
        ops in prop::collection::vec(op_strategy(), 0..40),
    ) {
        let env = ManualEnv::new(seed);
        let mut broker = Broker::new(env.clone(), BrokerConfig::default());
        for op in &ops {
            apply(&mut broker, &env, op);
        }

        let newcomer = ClientId(100);
        let someone_waiting = broker.registry().iter().any(|c| c.is_available());
        broker.on_join(newcomer, vec![], MatchType::Random).unwrap();

        let pairing = broker.registry().get(newcomer).unwrap().pairing;
        if someone_waiting {
            prop_assert!(matches!(pairing, PairingState::Paired(_)));
        } else {
            prop_assert_eq!(pairing, PairingState::Unpaired);
        }
    }

    /// Searching clients never outlive their expiry deadline.
    #[test]
    fn prop_searching_clients_resolve_by_expiry(
        seed in any::<u64>(),
        ops in prop::collection::vec(op_strategy(), 0..40),
    ) {
        let env = ManualEnv::new(seed);
        let mut broker = Broker::new(env.clone(), BrokerConfig::default());
        for op in &ops {
            apply(&mut broker, &env, op);
        }

        env.advance(Duration::from_secs(10));
        broker.on_tick().unwrap();

        prop_assert!(broker.escalation().is_empty());
        prop_assert!(broker.registry().iter().all(|c| c.pairing != PairingState::Searching));
        prop_assert_eq!(broker.next_deadline(), None);
    }
}
