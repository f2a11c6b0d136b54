//! Offer pool error types.

use thiserror::Error;

/// Errors returned by the offer pool's public operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("offer pool is stopped")]
    Closed,
}

pub type PoolResult<T> = Result<T, PoolError>;
