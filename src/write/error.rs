//! Write transaction error types.

use thiserror::Error;

use crate::host::{BranchName, HostError, MergeRequestSpec, RepositoryId};
use crate::lfs::Oid;
use crate::write::WriteStage;

/// Everything needed to re-attempt merge request creation for a committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMergeRequest {
    pub repository: RepositoryId,
    /// in-repository path of the written file
    pub path: String,
    /// sha of the pointer commit on the upload branch
    pub commit: String,
    pub spec: MergeRequestSpec,
}

/// A write transaction failure, naming the stage that failed.
#[derive(Debug, Error)]
pub enum WriteError {
    /// no unique upload branch could be created
    #[error("could not create an upload branch after {attempts} attempt(s)")]
    BranchCreation {
        attempts: u32,
        #[source]
        source: Option<HostError>,
    },

    /// the LFS object never reached the host; nothing was committed
    #[error("upload of object {oid} failed after {attempts} attempt(s)")]
    Upload {
        branch: BranchName,
        oid: Oid,
        attempts: u32,
        #[source]
        source: HostError,
    },

    /// the pointer commit failed; the upload branch is left as is
    #[error("committing {path} to {branch} failed")]
    Commit {
        branch: BranchName,
        path: String,
        #[source]
        source: HostError,
    },

    /// branch and commit exist but no merge request was opened
    #[error("opening a merge request from {} into {} failed", .pending.spec.source, .pending.spec.target)]
    MergeRequest {
        pending: Box<PendingMergeRequest>,
        #[source]
        source: HostError,
    },
}

impl WriteError {
    /// The stage that failed.
    pub fn stage(&self) -> WriteStage {
        match self {
            WriteError::BranchCreation { .. } => WriteStage::BranchEnsured,
            WriteError::Upload { .. } => WriteStage::ObjectUploaded,
            WriteError::Commit { .. } => WriteStage::PointerCommitted,
            WriteError::MergeRequest { .. } => WriteStage::MergeRequested,
        }
    }

    /// check if the write can safely be repeated; after an upload failure,
    /// resume on [`pending_branch`](Self::pending_branch) to avoid a second branch
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            WriteError::BranchCreation { .. } | WriteError::Upload { .. }
        )
    }

    /// The upload branch left behind by the failed transaction, if any.
    pub fn pending_branch(&self) -> Option<&BranchName> {
        match self {
            WriteError::BranchCreation { .. } => None,
            WriteError::Upload { branch, .. } | WriteError::Commit { branch, .. } => Some(branch),
            WriteError::MergeRequest { pending, .. } => Some(&pending.spec.source),
        }
    }

    /// State for `retry_merge_request`, when only the merge request is missing.
    pub fn pending_merge_request(&self) -> Option<&PendingMergeRequest> {
        match self {
            WriteError::MergeRequest { pending, .. } => Some(pending),
            _ => None,
        }
    }
}
