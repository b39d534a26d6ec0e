//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while validating protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A workspace code had the wrong length or a character outside the alphabet.
    #[error("invalid workspace code: {0:?}")]
    InvalidCode(String),

    /// A message could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Malformed(err.to_string())
    }
}
