//! Standard invariant checks.

use tandem_core::PairingState;
use tandem_proto::MatchType;

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// Pairing is symmetric.
///
/// If A is paired with B, B is registered and paired with A.
pub struct PairingSymmetry;

impl Invariant for PairingSymmetry {
    fn name(&self) -> &'static str {
        "pairing_symmetry"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let Some(partner) = client.partner() else {
                continue;
            };

            if partner == client.id {
                let message = format!("client {} paired with itself", client.id);
                return Err(Violation::new(self, message));
            }

            let back = state.client(partner).and_then(|p| p.partner());
            if back != Some(client.id) {
                return Err(Violation::new(
                    self,
                    format!("client {} paired with {partner}, which points at {back:?}", client.id),
                ));
            }
        }
        Ok(())
    }
}

/// Only waiting interest-mode clients sit in the interest index.
///
/// Every bucket member is registered, in interest mode, not paired and
/// advertises the bucket's tag. A paired client in a bucket could be matched
/// twice.
pub struct IndexExclusion;

impl Invariant for IndexExclusion {
    fn name(&self) -> &'static str {
        "index_exclusion"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (tag, members) in &state.buckets {
            for id in members {
                let Some(client) = state.client(*id) else {
                    return Err(Violation::new(
                        self,
                        format!("unregistered client {id} indexed under {tag:?}"),
                    ));
                };

                if client.partner().is_some() {
                    return Err(Violation::new(
                        self,
                        format!("paired client {id} indexed under {tag:?}"),
                    ));
                }

                if client.match_type != MatchType::Interest {
                    return Err(Violation::new(
                        self,
                        format!("random-mode client {id} indexed under {tag:?}"),
                    ));
                }

                if !client.interests.iter().any(|t| t == tag) {
                    return Err(Violation::new(
                        self,
                        format!("client {id} indexed under undeclared tag {tag:?}"),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Every unpaired interest-mode client is findable under each of its tags.
pub struct IndexCompleteness;

impl Invariant for IndexCompleteness {
    fn name(&self) -> &'static str {
        "index_completeness"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let waiting = state
            .clients
            .iter()
            .filter(|c| c.match_type == MatchType::Interest && c.partner().is_none());

        for client in waiting {
            let missing = client
                .interests
                .iter()
                .find(|tag| !state.buckets.get(*tag).is_some_and(|m| m.contains(&client.id)));

            if let Some(tag) = missing {
                return Err(Violation::new(
                    self,
                    format!("waiting client {} missing from bucket {tag:?}", client.id),
                ));
            }
        }
        Ok(())
    }
}

/// Exactly the searching clients have an escalation timer armed.
pub struct EscalationConsistency;

impl Invariant for EscalationConsistency {
    fn name(&self) -> &'static str {
        "escalation_consistency"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let searching = client.pairing == PairingState::Searching;
            let armed = state.armed.contains(&client.id);
            if searching != armed {
                return Err(Violation::new(
                    self,
                    format!("client {} is {:?} but armed={armed}", client.id, client.pairing),
                ));
            }
        }

        if let Some(id) = state.armed.iter().find(|id| state.client(**id).is_none()) {
            return Err(Violation::new(self, format!("timer armed for unregistered client {id}")));
        }

        Ok(())
    }
}
