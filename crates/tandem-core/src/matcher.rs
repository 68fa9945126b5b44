//! Partner selection policies.
//!
//! Pure functions over the registry and index; nothing here mutates state.
//! A candidate is eligible when it is not the caller and not paired.
//! Searching clients are eligible, which is how an interest-mode client
//! waiting on escalation gets picked up by a later joiner.
//!
//! Tie-breaks are deterministic: interest matching walks the caller's tags in
//! declared order and each bucket in ascending id order; the
//! different-interest scan walks the registry in ascending id order.

use tandem_proto::ClientId;

use crate::{env::Environment, interest_index::InterestIndex, registry::ClientRegistry};

fn is_eligible(registry: &ClientRegistry, caller: ClientId, candidate: ClientId) -> bool {
    candidate != caller && registry.get(candidate).is_ok_and(|c| c.is_available())
}

/// First eligible client sharing one of `interests`.
pub fn find_interest_match(
    registry: &ClientRegistry,
    index: &InterestIndex,
    id: ClientId,
    interests: &[String],
) -> Option<ClientId> {
    interests.iter().find_map(|interest| {
        index.candidates(interest).find(|&candidate| is_eligible(registry, id, candidate))
    })
}

/// First eligible client with no tag in common with `interests`.
///
/// Scans the whole registry, not just the index, so random-mode clients are
/// candidates too.
pub fn find_different_interest_match(
    registry: &ClientRegistry,
    id: ClientId,
    interests: &[String],
) -> Option<ClientId> {
    registry
        .iter()
        .find(|c| c.id != id && c.is_available() && !c.shares_interest_with(interests))
        .map(|c| c.id)
}

/// Uniformly random eligible client.
pub fn find_random_match<E: Environment>(
    registry: &ClientRegistry,
    id: ClientId,
    env: &E,
) -> Option<ClientId> {
    let candidates: Vec<ClientId> =
        registry.iter().filter(|c| c.id != id && c.is_available()).map(|c| c.id).collect();

    if candidates.is_empty() {
        return None;
    }

    let pick = env.random_below(candidates.len() as u64) as usize;
    candidates.get(pick).copied()
}

/// Tags in both lists, in `ours` order.
pub fn common_interests(ours: &[String], theirs: &[String]) -> Vec<String> {
    ours.iter().filter(|tag| theirs.contains(tag)).cloned().collect()
}
