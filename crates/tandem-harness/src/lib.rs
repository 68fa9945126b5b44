//! Deterministic simulation harness for the Tandem broker.
//!
//! Drives the sans-IO [`tandem_core::Broker`] under virtual time and a seeded
//! RNG, so escalation timing and random pairing replay exactly for a given
//! seed.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks structural properties (pairing symmetry,
//! interest index consistency, timer bookkeeping) against snapshots of broker
//! state. Use [`InvariantRegistry::standard()`] after every simulated step.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_broker;
pub mod sim_env;

pub use invariants::{
    ClientSnapshot, EscalationConsistency, IndexCompleteness, IndexExclusion, Invariant,
    InvariantRegistry, InvariantResult, PairingSymmetry, SystemSnapshot, Violation,
};
pub use sim_broker::SimBroker;
pub use sim_env::{SimEnv, SimInstant};
