//! Error types for the sync server.

use listsync_store::StoreError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// No workspace with this id.
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),

    /// No workspace with this code.
    #[error("no workspace for code {0:?}")]
    CodeNotFound(String),

    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The record store failed; the in-flight mutation was abandoned.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::WorkspaceNotFound(_)
                | ServerError::CodeNotFound(_)
                | ServerError::InvalidRequest(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Storage(_) | ServerError::Internal(_))
    }

    /// Returns true if the workspace or code did not resolve.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ServerError::WorkspaceNotFound(_) | ServerError::CodeNotFound(_)
        )
    }
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServerError::Internal(format!("blocking task failed: {err}"))
    }
}
