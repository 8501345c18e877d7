//! Storage error types.

use thiserror::Error;

/// Errors that can occur when using storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Pair not found: {0}")]
    PairNotFound(i64),

    #[error("Invalid stored value in {column}: {value}")]
    InvalidValue { column: &'static str, value: String },
}
