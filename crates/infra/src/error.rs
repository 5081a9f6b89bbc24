//! Engine-level error model.
//!
//! Domain failures pass through unchanged. Storage mechanics are folded in:
//! a lock wait that times out is a concurrency conflict, everything else is a
//! storage failure.

use thiserror::Error;

use lotflow_core::DomainError;

/// Storage operation error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("timed out waiting for lock on {0}")]
    LockTimeout(String),

    #[error("{0} written without holding its row lock")]
    NotLocked(String),

    #[error("duplicate row: {0}")]
    Duplicate(String),

    #[error("store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage failure: {0}")]
    Storage(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::LockTimeout(row) => {
                EngineError::Domain(DomainError::conflict(format!("lock wait timed out on {row}")))
            }
            other => EngineError::Storage(other.to_string()),
        }
    }
}

impl EngineError {
    /// The domain error, if this is one.
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            EngineError::Domain(err) => Some(err),
            EngineError::Storage(_) => None,
        }
    }

    /// Stable machine-readable category, used by the CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Domain(DomainError::Validation(_))
            | EngineError::Domain(DomainError::InvalidId(_)) => "validation",
            EngineError::Domain(DomainError::InvalidQuantity(_)) => "invalid_quantity",
            EngineError::Domain(DomainError::InvariantViolation(_)) => "invariant_violation",
            EngineError::Domain(DomainError::NotFound(_)) => "not_found",
            EngineError::Domain(DomainError::InsufficientStock(_)) => "insufficient_stock",
            EngineError::Domain(DomainError::InvalidStateTransition { .. }) => {
                "invalid_state_transition"
            }
            EngineError::Domain(DomainError::Conflict(_)) => "concurrency_conflict",
            EngineError::Storage(_) => "storage",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_becomes_concurrency_conflict() {
        let err: EngineError = StoreError::LockTimeout("lot 1".to_string()).into();
        assert!(matches!(err.domain(), Some(DomainError::Conflict(msg)) if msg.contains("lot 1")));
        assert_eq!(err.kind(), "concurrency_conflict");
    }

    #[test]
    fn other_store_errors_are_storage_failures() {
        let err: EngineError = StoreError::NotLocked("lot 1".to_string()).into();
        assert!(matches!(err, EngineError::Storage(_)));
        assert!(err.domain().is_none());
    }
}
