//! Environment abstraction for deterministic testing.
//!
//! Decouples matching logic from system resources (time, randomness). The
//! production runtime uses the wall clock and OS entropy; the simulation
//! harness uses a virtual clock and a seeded RNG so escalation timing and
//! random pairing are reproducible.

use std::{
    fmt::Debug,
    ops::{Add, Sub},
    time::Duration,
};

/// Point in time that escalation deadlines are measured from.
///
/// Offsetting is checked so an oversized delay can never panic the broker.
pub trait Timestamp:
    Copy + Ord + Debug + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = Self>
{
    /// `self + duration`, or `None` if that is out of range.
    fn checked_after(self, duration: Duration) -> Option<Self>;
}

impl Timestamp for std::time::Instant {
    fn checked_after(self, duration: Duration) -> Option<Self> {
        std::time::Instant::checked_add(&self, duration)
    }
}

impl Timestamp for Duration {
    fn checked_after(self, duration: Duration) -> Option<Self> {
        Duration::checked_add(self, duration)
    }
}

/// Abstract environment providing time and randomness.
///
/// # Invariants
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` is uniformly distributed
pub trait Environment: Clone + Send + Sync + 'static {
    /// The instant type used by this environment.
    ///
    /// Production uses `std::time::Instant`, the harness uses virtual time.
    type Instant: Timestamp;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Uniform random value in `0..bound`. Returns 0 when `bound` is 0 or 1.
    fn random_below(&self, bound: u64) -> u64 {
        if bound <= 1 {
            return 0;
        }

        // Values at or above the last full multiple of `bound` would skew
        // the low residues, so draw again.
        let zone = u64::MAX - (u64::MAX % bound);
        loop {
            let value = self.random_u64();
            if value < zone {
                return value % bound;
            }
        }
    }
}
