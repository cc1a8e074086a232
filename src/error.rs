//! Filesystem-facing error types.

use std::io;

use thiserror::Error;

use crate::host::HostError;
use crate::lfs::IntegrityError;
use crate::write::{WriteError, WriteStage};

/// Result type for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

/// Coarse classification of an [`FsError`], for matching without destructuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidPath,
    NotFound,
    PermissionDenied,
    CorruptObject,
    BranchCreation,
    Upload,
    Commit,
    MergeRequest,
    Unsupported,
    DirectoryExpected,
    FileExpected,
    Host,
    Io,
}

/// Errors surfaced by [`crate::ArcFs`].
#[derive(Debug, Error)]
pub enum FsError {
    /// malformed virtual path (`..`, missing repository name, empty namespace)
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// repository, ref or file does not exist or is not visible
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// LFS content does not match its pointer
    #[error("corrupt object at {path}: {source}")]
    CorruptObject {
        path: String,
        #[source]
        source: IntegrityError,
    },

    /// a write transaction failed at a named stage
    #[error(transparent)]
    Write(#[from] WriteError),

    /// metadata mutation and deletion are never supported
    #[error("{operation} is not supported: {path}")]
    Unsupported {
        operation: &'static str,
        path: String,
    },

    #[error("not a directory: {0}")]
    DirectoryExpected(String),

    #[error("not a file: {0}")]
    FileExpected(String),

    /// host failure outside a write transaction
    #[error("host error: {0}")]
    Host(#[source] HostError),

    /// local source or sink failed
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    pub(crate) fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        FsError::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(operation: &'static str, path: &str) -> Self {
        FsError::Unsupported {
            operation,
            path: path.to_string(),
        }
    }

    /// Map a host error, naming `path` for the not-found case.
    pub(crate) fn from_host(err: HostError, path: &str) -> Self {
        match err {
            HostError::NotFound(_) => FsError::NotFound(path.to_string()),
            HostError::PermissionDenied(msg) => FsError::PermissionDenied(msg),
            other => FsError::Host(other),
        }
    }

    /// Map a read-side io error, recognising integrity failures.
    pub(crate) fn from_read(err: io::Error, path: &str) -> Self {
        match IntegrityError::from_io(&err) {
            Some(integrity) => FsError::CorruptObject {
                path: path.to_string(),
                source: integrity.clone(),
            },
            None => FsError::Io(err),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FsError::InvalidPath { .. } => ErrorKind::InvalidPath,
            FsError::NotFound(_) => ErrorKind::NotFound,
            FsError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            FsError::CorruptObject { .. } => ErrorKind::CorruptObject,
            FsError::Write(err) => match err.stage() {
                WriteStage::BranchEnsured => ErrorKind::BranchCreation,
                WriteStage::ObjectUploaded => ErrorKind::Upload,
                WriteStage::PointerCommitted => ErrorKind::Commit,
                WriteStage::MergeRequested => ErrorKind::MergeRequest,
                // stages without a failure mode of their own
                WriteStage::Init | WriteStage::Done => ErrorKind::Host,
            },
            FsError::Unsupported { .. } => ErrorKind::Unsupported,
            FsError::DirectoryExpected(_) => ErrorKind::DirectoryExpected,
            FsError::FileExpected(_) => ErrorKind::FileExpected,
            FsError::Host(_) => ErrorKind::Host,
            FsError::Io(_) => ErrorKind::Io,
        }
    }
}

impl From<HostError> for FsError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::NotFound(what) => FsError::NotFound(what),
            HostError::PermissionDenied(msg) => FsError::PermissionDenied(msg),
            other => FsError::Host(other),
        }
    }
}
