//! Host layer error types
//!
//! Every failure a `RepositoryHost` implementation can report is defined here.
//! Implementations map their transport-specific failures (HTTP status codes,
//! git2 error codes) onto these variants so the layers above can classify them.

use thiserror::Error;

/// the main error type for host operations
#[derive(Debug, Error)]
pub enum HostError {
    /// repository, ref, branch or path does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// the credential lacks the required scope
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// the object to create exists already (branch, file)
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// the request timed out; the host may or may not have applied it
    #[error("timed out: {0}")]
    Timeout(String),

    /// a byte transfer stopped before completion
    #[error("transfer interrupted: {0}")]
    Interrupted(String),

    /// connection-level failure before a response was received
    #[error("transport error: {0}")]
    Transport(String),

    /// unexpected HTTP status
    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },

    /// the host returned something we could not interpret
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// stored or transferred bytes do not match their declared oid/size
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// error from the underlying Git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HostError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, HostError::NotFound(_))
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, HostError::PermissionDenied(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, HostError::AlreadyExists(_))
    }

    /// check if the host may have applied the request despite the error
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, HostError::Timeout(_) | HostError::Interrupted(_))
    }

    /// check if this error is recoverable by retry
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            HostError::Timeout(_) | HostError::Interrupted(_) | HostError::Transport(_)
        )
    }
}

/// result type alias for host operations
pub type HostResult<T> = Result<T, HostError>;
