//! Domain error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{AggregateId, ProductId};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// One uncovered demand discovered by the allocator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub product_id: ProductId,
    /// Order the demand belongs to; `None` for transfer lines and loose stock.
    pub order_id: Option<AggregateId>,
    pub requested: i64,
    pub covered: i64,
}

impl Shortfall {
    pub fn missing(&self) -> i64 {
        self.requested - self.covered
    }
}

impl core::fmt::Display for Shortfall {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "product {} short by {} (requested {}, covered {})",
            self.product_id,
            self.missing(),
            self.requested,
            self.covered
        )?;
        if let Some(order_id) = self.order_id {
            write!(f, " for order {order_id}")?;
        }
        Ok(())
    }
}

fn describe_shortfalls(shortfalls: &[Shortfall]) -> String {
    shortfalls
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Storage mechanics belong to the infra layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or contradictory input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A lot quantity change would leave the lot negative.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// FIFO allocation could not cover the requested demand.
    #[error("insufficient stock: {}", describe_shortfalls(.0))]
    InsufficientStock(Vec<Shortfall>),

    /// The record is in a state that does not allow the requested action.
    #[error("invalid state transition: cannot {action} {entity} in state {from}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        action: &'static str,
    },

    /// Lost race or lock wait timeout.
    #[error("concurrency conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Single-product shortfall (transfer lines, plain allocation commits).
    pub fn insufficient(product_id: ProductId, requested: i64, covered: i64) -> Self {
        Self::InsufficientStock(vec![Shortfall {
            product_id,
            order_id: None,
            requested,
            covered,
        }])
    }

    pub fn invalid_transition(
        entity: &'static str,
        from: impl core::fmt::Debug,
        action: &'static str,
    ) -> Self {
        Self::InvalidStateTransition {
            entity,
            from: format!("{from:?}").trim_matches('"').to_string(),
            action,
        }
    }

    /// Shortfalls carried by an `InsufficientStock` error (empty otherwise).
    pub fn shortfalls(&self) -> &[Shortfall] {
        match self {
            Self::InsufficientStock(shortfalls) => shortfalls,
            _ => &[],
        }
    }
}
