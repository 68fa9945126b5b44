//! Error types for the matchmaking core.
//!
//! Only [`BrokerError::InvariantViolation`] indicates a bug. The other
//! variants describe client ids that are unknown or reused, which the
//! coordinator absorbs as silent no-ops.

use tandem_proto::ClientId;
use thiserror::Error;

/// Errors from registry and coordinator operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Referenced client is not registered
    #[error("client not found: {0}")]
    NotFound(ClientId),

    /// Client id is already registered
    #[error("client already registered: {0}")]
    DuplicateClient(ClientId),

    /// Pairing or index state is inconsistent
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl BrokerError {
    /// Returns true if this error means the matching state is corrupt.
    ///
    /// Lookups of unknown ids and duplicate joins are expected under normal
    /// churn; an invariant violation never is.
    pub fn is_bug(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_invariant_violations_are_bugs() {
        assert!(!BrokerError::NotFound(ClientId(1)).is_bug());
        assert!(!BrokerError::DuplicateClient(ClientId(1)).is_bug());
        assert!(BrokerError::InvariantViolation("asymmetric".to_string()).is_bug());
    }

    #[test]
    fn error_display() {
        assert_eq!(BrokerError::NotFound(ClientId(42)).to_string(), "client not found: 42");
        assert_eq!(
            BrokerError::DuplicateClient(ClientId(7)).to_string(),
            "client already registered: 7"
        );
    }
}
