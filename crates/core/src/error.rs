//! Ledger error model.

use thiserror::Error;

use crate::id::{LocationRef, ProductId, RecordId, VariationId};

/// Result type used across the ledger.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger-level error.
///
/// Every variant carries enough context (record id, offending field or
/// quantity) for a caller to render a precise message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Malformed or incomplete input.
    #[error("validation failed{}: {message}", field_suffix(.record, .field))]
    Validation {
        record: Option<RecordId>,
        field: Option<String>,
        message: String,
    },

    /// Confirmation blocked because the source location does not hold enough stock.
    #[error(
        "insufficient stock for {record} at {location} ({product}{}): requested {requested}, available {available}",
        variation_suffix(.variation)
    )]
    InsufficientStock {
        record: RecordId,
        location: LocationRef,
        product: ProductId,
        variation: Option<VariationId>,
        requested: u64,
        available: u64,
    },

    /// Attempt to edit a record whose stock effect has already been applied.
    #[error("{record} is confirmed and cannot be edited")]
    ImmutableState { record: RecordId },

    /// Delete blocked because the confirmed stock was already used downstream.
    #[error("stock from {record} was already consumed at {location} ({product}): {reason}")]
    StockAlreadyConsumed {
        record: RecordId,
        location: LocationRef,
        product: ProductId,
        consumed_by: Option<RecordId>,
        reason: String,
    },

    /// The actor lacks the role required for a guarded transition.
    #[error("actor '{actor}' lacks permission '{required}'")]
    Permission { actor: String, required: String },

    #[error("{0} not found")]
    NotFound(RecordId),

    /// A concurrent writer won (stale snapshot or movement version).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The persistence layer failed; retrying the same write will not help.
    #[error("storage failure: {0}")]
    Storage(String),
}

fn field_suffix(record: &Option<RecordId>, field: &Option<String>) -> String {
    match (record, field) {
        (Some(r), Some(f)) => format!(" ({r}, field '{f}')"),
        (Some(r), None) => format!(" ({r})"),
        (None, Some(f)) => format!(" (field '{f}')"),
        (None, None) => String::new(),
    }
}

fn variation_suffix(variation: &Option<VariationId>) -> String {
    variation.map(|v| format!("/{v}")).unwrap_or_default()
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            record: None,
            field: None,
            message: msg.into(),
        }
    }

    pub fn validation_field(
        record: Option<RecordId>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            record,
            field: Some(field.into()),
            message: msg.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn permission(actor: impl Into<String>, required: impl Into<String>) -> Self {
        Self::Permission {
            actor: actor.into(),
            required: required.into(),
        }
    }

    /// Whether the caller can fix the failure by changing its input.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::InsufficientStock { .. } | Self::Conflict(_))
    }
}
