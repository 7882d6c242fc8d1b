//! Domain error types.

use thiserror::Error;

use crate::order::OrderStatus;
use crate::prescription::{PrescriptionIssue, PrescriptionIssueKind};
use crate::store::StoreError;

/// Errors that can occur during cart and order operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A referenced medicine, prescription, cart line or order does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness constraint or a concurrent update got in the way.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request data is out of bounds or malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Not enough stock to satisfy the requested quantity.
    #[error("Insufficient stock for {medicine}. Available: {available}, Requested: {requested}")]
    InsufficientStock {
        medicine: String,
        available: u32,
        requested: u32,
    },

    /// A prescription-required medicine is not unlocked by its prescription.
    #[error("Prescription invalid for {medicine}: {issue}")]
    PrescriptionInvalid {
        medicine: String,
        issue: PrescriptionIssueKind,
    },

    /// The order status graph does not allow the requested move.
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStateTransition { from: OrderStatus, to: OrderStatus },

    /// The caller lacks ownership or the required capability.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Cart validation rejected checkout; carries the full report.
    #[error("Cart validation failed: {}", errors.join("; "))]
    CartValidationFailed {
        errors: Vec<String>,
        prescription_issues: Vec<PrescriptionIssue>,
    },

    /// The storage backend failed.
    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl DomainError {
    /// Stable snake_case name of the error kind, used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::NotFound { .. } => "not_found",
            DomainError::Conflict(_) => "conflict",
            DomainError::InvalidInput(_) => "invalid_input",
            DomainError::InsufficientStock { .. } => "insufficient_stock",
            DomainError::PrescriptionInvalid { .. } => "prescription_invalid",
            DomainError::InvalidStateTransition { .. } => "invalid_state_transition",
            DomainError::Forbidden(_) => "forbidden",
            DomainError::CartValidationFailed { .. } => "cart_validation_failed",
            DomainError::Store(_) => "store",
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DomainError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => DomainError::NotFound { entity, id },
            StoreError::InsufficientStock {
                medicine_id,
                available,
                requested,
            } => DomainError::InsufficientStock {
                medicine: medicine_id.to_string(),
                available,
                requested,
            },
            StoreError::Duplicate(what) => DomainError::Conflict(what),
            StoreError::StatusConflict {
                order_id, actual, ..
            } => DomainError::Conflict(format!(
                "order {order_id} was modified concurrently and is now {actual}"
            )),
            StoreError::QuantityLimit { limit, requested } => DomainError::InvalidInput(format!(
                "quantity {requested} exceeds the allowed maximum of {limit}"
            )),
            other @ StoreError::Backend(_) => DomainError::Store(other),
        }
    }
}
