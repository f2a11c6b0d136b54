//! Error types shared across drover crates.

use thiserror::Error;

use crate::attribute::ValueType;

/// Errors decoding a wire-encoded attribute.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttributeError {
    #[error("unknown value type: {0}")]
    UnknownType(u8),

    #[error("attribute {name}: {kind} payload missing")]
    MissingPayload { name: String, kind: ValueType },

    #[error("attribute {name}: more than one payload for type {kind}")]
    ConflictingPayload { name: String, kind: ValueType },
}

/// Result type alias for [`crate::Store`] operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by a [`crate::Store`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Result type alias for [`crate::SchedulerClient`] operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors returned by the resource-manager client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("rpc timed out after {0:?}")]
    Timeout(std::time::Duration),
}
