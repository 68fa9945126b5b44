//! Production Environment implementation using system time and RNG.
//!
//! `SystemEnv` drives the broker with the real monotonic clock and OS
//! randomness. Escalation deadlines are `std::time::Instant`s, which the
//! broker task converts to tokio instants when it sleeps.

use tandem_core::Environment;

/// Production environment using system time and OS randomness.
///
/// # Panics
///
/// Panics if the OS RNG fails. Random pairing cannot proceed without it and
/// the failure indicates an OS-level problem.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}
