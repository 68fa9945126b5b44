//! Scenario tests for matchmaking behavior.
//!
//! Each test drives a [`SimBroker`] through one user-visible story under
//! virtual time and checks the messages every client received.

use std::time::Duration;

use tandem_core::PairingState;
use tandem_harness::{InvariantRegistry, SimBroker};
use tandem_proto::{ClientId, MatchKind, MatchType, ServerMessage};

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn pairing(sim: &SimBroker, id: ClientId) -> Option<PairingState> {
    sim.broker().registry().get(id).ok().map(|client| client.pairing)
}

#[test]
fn interest_join_pairs_on_shared_tag() {
    let mut sim = SimBroker::new(1);
    let a = sim.connect().unwrap();
    let b = sim.connect().unwrap();

    sim.join(a, &["chess", "go", "jazz"], MatchType::Interest).unwrap();
    sim.join(b, &["jazz", "art", "go"], MatchType::Interest).unwrap();

    // Common interests follow each recipient's own ordering
    assert_eq!(
        sim.take_messages(b),
        vec![ServerMessage::matched(
            a,
            MatchKind::Interest,
            vec!["jazz".to_string(), "go".to_string()]
        )]
    );
    assert_eq!(
        sim.take_messages(a),
        vec![ServerMessage::matched(
            b,
            MatchKind::Interest,
            vec!["go".to_string(), "jazz".to_string()]
        )]
    );
    assert!(sim.snapshot().buckets.is_empty());
    InvariantRegistry::standard().assert_all(&sim.snapshot(), "after interest pairing");
}

#[test]
fn lonely_interest_search_broadens_then_expires() {
    let mut sim = SimBroker::new(2);
    let a = sim.connect().unwrap();
    sim.join(a, &["chess"], MatchType::Interest).unwrap();

    sim.advance(secs(8)).unwrap();
    assert!(sim.messages(a).is_empty());
    assert!(sim.logs().iter().any(|(_, line)| line.contains("broadened")));
    assert_eq!(pairing(&sim, a), Some(PairingState::Searching));

    sim.advance(secs(2)).unwrap();
    assert_eq!(sim.take_messages(a), vec![ServerMessage::no_match_found()]);
    assert_eq!(pairing(&sim, a), None);
    assert!(!sim.snapshot().is_indexed(a));
    assert!(sim.broker().next_deadline().is_none());
}

#[test]
fn broadened_search_prefers_different_interests() {
    let mut sim = SimBroker::new(3);
    let a = sim.connect().unwrap();
    let b = sim.connect().unwrap();
    let c = sim.connect().unwrap();

    sim.join(a, &["chess"], MatchType::Interest).unwrap();
    sim.advance(secs(1)).unwrap();
    sim.join(b, &["art"], MatchType::Interest).unwrap();
    sim.advance(secs(1)).unwrap();
    sim.join(c, &["jazz"], MatchType::Interest).unwrap();

    // a broadens first and takes the lowest eligible id with no overlap
    sim.advance(secs(6)).unwrap();
    assert_eq!(
        sim.take_messages(a),
        vec![ServerMessage::matched(b, MatchKind::Different, Vec::new())]
    );
    assert_eq!(
        sim.take_messages(b),
        vec![ServerMessage::matched(a, MatchKind::Different, Vec::new())]
    );

    // b's own timers were cancelled by the pairing; c is alone and expires
    sim.advance(secs(10)).unwrap();
    assert!(sim.messages(b).is_empty());
    assert_eq!(sim.take_messages(c), vec![ServerMessage::no_match_found()]);
}

#[test]
fn broadened_search_falls_back_to_random() {
    let mut sim = SimBroker::new(4);
    let a = sim.connect().unwrap();
    let b = sim.connect().unwrap();

    // b waits in random mode, so it is never indexed under its tag
    sim.join(b, &["chess"], MatchType::Random).unwrap();
    sim.join(a, &["chess"], MatchType::Interest).unwrap();
    assert_eq!(pairing(&sim, a), Some(PairingState::Searching));

    // Everyone available shares a tag with a, so broadening goes random
    sim.advance(secs(8)).unwrap();
    assert_eq!(sim.take_messages(a), vec![ServerMessage::matched(b, MatchKind::Random, vec![])]);
    assert_eq!(sim.take_messages(b), vec![ServerMessage::matched(a, MatchKind::Random, vec![])]);
    assert!(sim.broker().next_deadline().is_none());
}

#[test]
fn random_join_picks_up_interest_searcher() {
    let mut sim = SimBroker::new(13);
    let a = sim.connect().unwrap();
    let b = sim.connect().unwrap();

    sim.join(a, &["chess"], MatchType::Interest).unwrap();
    sim.join(b, &["chess"], MatchType::Random).unwrap();

    assert_eq!(sim.take_messages(b), vec![ServerMessage::matched(a, MatchKind::Random, vec![])]);
    assert_eq!(pairing(&sim, a), Some(PairingState::Paired(b)));
    assert!(sim.broker().next_deadline().is_none());
}

#[test]
fn random_join_matches_anyone_waiting() {
    let mut sim = SimBroker::new(5);
    let a = sim.connect().unwrap();
    let b = sim.connect().unwrap();

    sim.join(a, &[], MatchType::Random).unwrap();
    assert!(sim.messages(a).is_empty());
    assert_eq!(pairing(&sim, a), Some(PairingState::Unpaired));

    sim.join(b, &[], MatchType::Random).unwrap();
    assert_eq!(sim.take_messages(a), vec![ServerMessage::matched(b, MatchKind::Random, vec![])]);
    assert_eq!(sim.take_messages(b), vec![ServerMessage::matched(a, MatchKind::Random, vec![])]);
}

#[test]
fn disconnect_notifies_partner_and_clears_state() {
    let mut sim = SimBroker::new(6);
    let a = sim.connect().unwrap();
    let b = sim.connect().unwrap();
    sim.join(a, &["go"], MatchType::Interest).unwrap();
    sim.join(b, &["go"], MatchType::Interest).unwrap();
    sim.take_messages(a);
    sim.take_messages(b);

    sim.disconnect(a).unwrap();

    assert_eq!(sim.take_messages(b), vec![ServerMessage::partner_disconnected()]);
    assert_eq!(pairing(&sim, a), None);
    assert_eq!(pairing(&sim, b), Some(PairingState::Unpaired));
    assert!(!sim.snapshot().is_indexed(a));
    // b returns to the pool under its tags
    assert!(sim.snapshot().buckets["go"].contains(&b));

    // Idempotent
    sim.disconnect(a).unwrap();
    assert!(sim.messages(b).is_empty());
}

#[test]
fn messages_reach_only_the_partner() {
    let mut sim = SimBroker::new(7);
    let a = sim.connect().unwrap();
    let b = sim.connect().unwrap();
    let c = sim.connect().unwrap();
    sim.join(a, &[], MatchType::Random).unwrap();
    sim.join(b, &[], MatchType::Random).unwrap();
    sim.join(c, &[], MatchType::Random).unwrap();
    for id in [a, b, c] {
        sim.take_messages(id);
    }

    let partner_of_a = match pairing(&sim, a) {
        Some(PairingState::Paired(partner)) => partner,
        other => panic!("a should be paired, got {other:?}"),
    };
    let outsider = if partner_of_a == b { c } else { b };

    sim.message(a, partner_of_a, "hi").unwrap();
    sim.message(outsider, a, "psst").unwrap();
    sim.message(a, ClientId(99), "anyone?").unwrap();

    assert_eq!(sim.take_messages(partner_of_a), vec![ServerMessage::message(a, "hi")]);
    assert!(sim.messages(a).is_empty());
    assert!(sim.messages(outsider).is_empty());
}

#[test]
fn disconnect_partner_keeps_both_joined() {
    let mut sim = SimBroker::new(8);
    let a = sim.connect().unwrap();
    let b = sim.connect().unwrap();
    sim.join(a, &[], MatchType::Random).unwrap();
    sim.join(b, &[], MatchType::Random).unwrap();
    sim.take_messages(a);
    sim.take_messages(b);

    // Naming someone else is ignored
    sim.disconnect_partner(a, ClientId(42)).unwrap();
    assert_eq!(pairing(&sim, a), Some(PairingState::Paired(b)));

    sim.disconnect_partner(a, b).unwrap();
    assert_eq!(sim.take_messages(b), vec![ServerMessage::partner_disconnected()]);
    assert!(sim.messages(a).is_empty());
    assert_eq!(pairing(&sim, a), Some(PairingState::Unpaired));
    assert_eq!(pairing(&sim, b), Some(PairingState::Unpaired));

    // Either side can ask again
    sim.find_new_partner(b).unwrap();
    assert_eq!(sim.take_messages(b), vec![ServerMessage::matched(a, MatchKind::Random, vec![])]);
    assert_eq!(sim.take_messages(a), vec![ServerMessage::matched(b, MatchKind::Random, vec![])]);
}

#[test]
fn find_new_partner_is_ignored_while_paired() {
    let mut sim = SimBroker::new(9);
    let a = sim.connect().unwrap();
    let b = sim.connect().unwrap();
    let c = sim.connect().unwrap();
    sim.join(a, &[], MatchType::Random).unwrap();
    sim.join(b, &[], MatchType::Random).unwrap();
    sim.take_messages(a);
    sim.take_messages(b);

    sim.join(c, &["chess"], MatchType::Interest).unwrap();
    sim.find_new_partner(a).unwrap();

    assert_eq!(pairing(&sim, a), Some(PairingState::Paired(b)));
    assert!(sim.messages(a).is_empty());
    assert_eq!(pairing(&sim, c), Some(PairingState::Searching));
}

#[test]
fn failed_find_new_partner_does_not_arm_escalation() {
    let mut sim = SimBroker::new(10);
    let a = sim.connect().unwrap();
    let b = sim.connect().unwrap();
    sim.join(a, &["chess"], MatchType::Interest).unwrap();
    sim.join(b, &["chess"], MatchType::Interest).unwrap();
    sim.disconnect_partner(a, b).unwrap();
    sim.disconnect(b).unwrap();
    sim.take_messages(a);

    sim.find_new_partner(a).unwrap();

    assert_eq!(pairing(&sim, a), Some(PairingState::Unpaired));
    assert!(sim.broker().next_deadline().is_none());
    sim.advance(secs(60)).unwrap();
    assert!(sim.messages(a).is_empty());
}

#[test]
fn rejoin_replaces_previous_registration() {
    let mut sim = SimBroker::new(11);
    let a = sim.connect().unwrap();
    sim.join(a, &["chess"], MatchType::Interest).unwrap();
    sim.join(a, &["go"], MatchType::Interest).unwrap();

    let snapshot = sim.snapshot();
    assert!(!snapshot.buckets.contains_key("chess"));
    assert!(snapshot.buckets["go"].contains(&a));
    assert_eq!(snapshot.armed.len(), 1);
}

#[test]
fn unaccepted_connection_is_ignored() {
    let mut sim = SimBroker::new(12);

    sim.join(ClientId(77), &[], MatchType::Random).unwrap();

    assert_eq!(sim.broker().client_count(), 0);
    assert!(sim.messages(ClientId(77)).is_empty());
}

#[test]
fn same_seed_replays_random_pairings() {
    fn run(seed: u64) -> Vec<Vec<ServerMessage>> {
        let mut sim = SimBroker::new(seed);
        let tags = ["chess", "go", "art", "jazz", "film"];
        let ids: Vec<ClientId> = (0..=tags.len()).map(|_| sim.connect().unwrap()).collect();

        // Five searchers with disjoint tags, then one random joiner picks among them
        for (&id, tag) in ids.iter().zip(tags) {
            sim.join(id, &[tag], MatchType::Interest).unwrap();
        }
        sim.join(ids[tags.len()], &[], MatchType::Random).unwrap();

        ids.iter().map(|&id| sim.take_messages(id)).collect()
    }

    let first = run(21);
    assert_eq!(first, run(21));
    assert_eq!(first.iter().filter(|outbox| !outbox.is_empty()).count(), 2);
}
