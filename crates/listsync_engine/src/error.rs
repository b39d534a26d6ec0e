//! Error types for the sync agent.

use listsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the sync agent.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server does not know the workspace or code.
    #[error("not found: {0}")]
    NotFound(String),

    /// The server rejected the request.
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP status.
        status: u16,
        /// Error message from the response body.
        message: String,
    },

    /// Malformed message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No workspace is joined.
    #[error("no workspace joined")]
    NotJoined,

    /// The device is offline.
    #[error("device is offline")]
    Offline,

    /// Built-in lists cannot be deleted.
    #[error("list {0:?} is built in and cannot be deleted")]
    BuiltinList(String),

    /// No live record with this id.
    #[error("unknown record: {0}")]
    UnknownRecord(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Protocol(err.to_string())
        } else if err.is_builder() {
            SyncError::transport_fatal(err.to_string())
        } else {
            SyncError::transport_retryable(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Url(e) => SyncError::transport_fatal(e.to_string()),
            other => SyncError::transport_retryable(other.to_string()),
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}
