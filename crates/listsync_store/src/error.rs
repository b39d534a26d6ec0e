//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The workspace id cannot be used as a storage key.
    #[error("invalid workspace id: {0:?}")]
    InvalidId(String),

    /// The stored document does not match the id it was stored under.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}
