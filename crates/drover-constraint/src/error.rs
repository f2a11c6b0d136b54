//! Constraint engine error types.

use thiserror::Error;

use drover_core::{Operator, StoreError};

/// Constraint evaluation errors.
///
/// These mean the rule itself (or the store behind it) is unusable. A rule
/// that is merely not satisfied is `Ok(false)`, not an error.
#[derive(Debug, Error)]
pub enum ConstraintError {
    #[error("constraint {name:?} ({operator:?}) requires a value")]
    MissingValue { name: String, operator: Operator },

    #[error("constraint {name:?} ({operator:?}) has an invalid value: {reason}")]
    InvalidValue {
        name: String,
        operator: Operator,
        reason: String,
    },

    #[error("constraint {name:?}: {value:?} is not a valid number")]
    InvalidNumber { name: String, value: String },

    #[error("malformed request-ip label {key}: {value:?}")]
    InvalidRequestIp { key: String, value: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type ConstraintResult<T> = Result<T, ConstraintError>;
