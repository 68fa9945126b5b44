//! Escalation scheduler.
//!
//! An interest-mode client that finds nobody on join is armed here. After
//! `broaden_after` its search widens to different-interest and random
//! partners; after `expire_after` it is dropped. Both deadlines are fixed
//! when the client is armed.
//!
//! The scheduler never fires on its own. The runtime asks for
//! [`EscalationScheduler::next_deadline`], sleeps until then, and delivers a
//! tick. The coordinator drains every due step with
//! [`EscalationScheduler::due`] and skips steps whose client was paired or
//! removed by an earlier step in the same batch.

use std::{collections::HashMap, time::Duration};

use tandem_proto::ClientId;

use crate::env::Timestamp;

/// Longest delay either escalation step may be configured with.
pub const MAX_ESCALATION_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Escalation timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationConfig {
    /// Delay from arming until the search broadens
    pub broaden_after: Duration,
    /// Delay from arming until the client is dropped
    pub expire_after: Duration,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self { broaden_after: Duration::from_secs(8), expire_after: Duration::from_secs(10) }
    }
}

impl EscalationConfig {
    /// Expiry must come strictly after broadening, and neither may exceed
    /// [`MAX_ESCALATION_DELAY`].
    pub fn is_valid(&self) -> bool {
        self.expire_after > self.broaden_after && self.expire_after <= MAX_ESCALATION_DELAY
    }

    /// Both delays capped at [`MAX_ESCALATION_DELAY`].
    pub fn clamped(self) -> Self {
        Self {
            broaden_after: self.broaden_after.min(MAX_ESCALATION_DELAY),
            expire_after: self.expire_after.min(MAX_ESCALATION_DELAY),
        }
    }
}

/// Where an armed client is in its escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationPhase<I> {
    /// Strict-interest search, waiting to broaden
    Searching {
        /// When the search broadens
        broaden_at: I,
        /// When the client is dropped
        expire_at: I,
    },
    /// Broadened once, waiting to expire
    Broadened {
        /// When the client is dropped
        expire_at: I,
    },
}

impl<I: Copy> EscalationPhase<I> {
    /// Next deadline for this phase.
    pub fn deadline(&self) -> I {
        match *self {
            Self::Searching { broaden_at, .. } => broaden_at,
            Self::Broadened { expire_at } => expire_at,
        }
    }
}

/// A due escalation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationStep {
    /// Try different-interest, then random
    Broaden,
    /// Give up and drop the client
    Expire,
}

/// Per-client escalation timers.
#[derive(Debug)]
pub struct EscalationScheduler<I> {
    config: EscalationConfig,
    entries: HashMap<ClientId, EscalationPhase<I>>,
}

impl<I: Timestamp> EscalationScheduler<I> {
    /// Create an empty scheduler. Delays are capped at
    /// [`MAX_ESCALATION_DELAY`].
    pub fn new(config: EscalationConfig) -> Self {
        Self { config: config.clamped(), entries: HashMap::new() }
    }

    /// Timing in use.
    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// Arm `id` with both deadlines measured from `now`.
    ///
    /// Returns `false` without touching the deadlines if already armed. A
    /// deadline past the end of the clock falls due immediately, so the
    /// client broadens and expires on the next tick.
    pub fn arm(&mut self, id: ClientId, now: I) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }

        let broaden_at = now.checked_after(self.config.broaden_after).unwrap_or(now);
        let expire_at = now.checked_after(self.config.expire_after).unwrap_or(broaden_at);

        self.entries.insert(id, EscalationPhase::Searching { broaden_at, expire_at });
        true
    }

    /// Disarm `id`. Returns `true` if it was armed.
    pub fn cancel(&mut self, id: ClientId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Check if `id` is armed.
    pub fn is_armed(&self, id: ClientId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Current phase of `id`.
    pub fn phase(&self, id: ClientId) -> Option<EscalationPhase<I>> {
        self.entries.get(&id).copied()
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<I> {
        self.entries.values().map(EscalationPhase::deadline).min()
    }

    /// Pop the earliest step due at `now`, ties broken by id.
    ///
    /// Popping a broaden step leaves the client armed in
    /// [`EscalationPhase::Broadened`]; popping an expire step disarms it.
    pub fn pop_due(&mut self, now: I) -> Option<(ClientId, EscalationStep)> {
        let (id, phase) = self
            .entries
            .iter()
            .filter(|(_, phase)| phase.deadline() <= now)
            .min_by_key(|(id, phase)| (phase.deadline(), **id))
            .map(|(id, phase)| (*id, *phase))?;

        match phase {
            EscalationPhase::Searching { expire_at, .. } => {
                self.entries.insert(id, EscalationPhase::Broadened { expire_at });
                Some((id, EscalationStep::Broaden))
            },
            EscalationPhase::Broadened { .. } => {
                self.entries.remove(&id);
                Some((id, EscalationStep::Expire))
            },
        }
    }

    /// Drain every step due at `now`, in deadline order.
    pub fn due(&mut self, now: I) -> Vec<(ClientId, EscalationStep)> {
        std::iter::from_fn(|| self.pop_due(now)).collect()
    }

    /// Armed client ids, in no particular order.
    pub fn armed(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.entries.keys().copied()
    }

    /// Number of armed clients.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Nothing armed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
