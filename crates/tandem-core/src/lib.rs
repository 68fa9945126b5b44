//! Sans-IO matchmaking engine for the Tandem broker.
//!
//! Pairs anonymous clients into two-party chats: by shared interest, by
//! deliberately different interests once an interest search has waited long
//! enough, or at random.
//!
//! # Architecture
//!
//! The [`Broker`] consumes [`BrokerEvent`]s and returns [`BrokerAction`]s. It
//! never touches sockets, spawns tasks or reads the system clock; time and
//! randomness come from an [`Environment`]. The same code therefore runs under
//! the tokio runtime in `tandem-server` and under virtual time in
//! `tandem-harness`.
//!
//! # Components
//!
//! - [`ClientRegistry`]: client id → pairing state
//! - [`InterestIndex`]: interest tag → waiting interest-mode clients
//! - [`matcher`]: stateless partner selection policies
//! - [`EscalationScheduler`]: per-client broaden/expire deadlines
//! - [`Broker`]: coordinates all of the above

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod client;
pub mod env;
pub mod error;
pub mod escalation;
pub mod interest_index;
pub mod matcher;
pub mod registry;

pub use broker::{Broker, BrokerAction, BrokerConfig, BrokerEvent, LogLevel};
pub use client::{Client, PairingState, normalize_interests};
pub use env::{Environment, Timestamp};
pub use error::BrokerError;
pub use escalation::{
    EscalationConfig, EscalationPhase, EscalationScheduler, EscalationStep, MAX_ESCALATION_DELAY,
};
pub use interest_index::InterestIndex;
pub use registry::ClientRegistry;
