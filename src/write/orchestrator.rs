//! Runs write transactions end to end.

use std::io::Read;
use std::sync::Arc;

use tracing::info;

use crate::error::{FsError, FsResult};
use crate::host::{BranchName, MergeRequest, RepositoryHost};
use crate::resolver::RepositoryCoordinate;
use crate::write::error::{PendingMergeRequest, WriteError};
use crate::write::spool::SpooledContent;
use crate::write::transaction::{Started, WriteLimits, WriteReceipt, WriteTransaction};

/// Turns "write this file" into branch, upload, commit and merge request.
#[derive(Clone)]
pub struct WriteOrchestrator {
    host: Arc<dyn RepositoryHost>,
    limits: WriteLimits,
}

impl WriteOrchestrator {
    pub fn new(host: Arc<dyn RepositoryHost>, limits: WriteLimits) -> Self {
        Self { host, limits }
    }

    /// Start a transaction without running any stage.
    pub fn begin(
        &self,
        coordinate: &RepositoryCoordinate,
        content: SpooledContent,
        target: Option<BranchName>,
    ) -> FsResult<WriteTransaction<Started>> {
        WriteTransaction::begin(Arc::clone(&self.host), self.limits, coordinate, content, target)
    }

    /// Run all stages for already spooled content.
    pub fn write(
        &self,
        coordinate: &RepositoryCoordinate,
        content: SpooledContent,
        target: Option<BranchName>,
    ) -> FsResult<WriteReceipt> {
        let receipt = self
            .begin(coordinate, content, target)?
            .ensure_branch()?
            .upload_object()?
            .commit_pointer()?
            .request_merge()?;
        Ok(receipt)
    }

    /// Spool `source` and run all stages.
    pub fn write_from(
        &self,
        coordinate: &RepositoryCoordinate,
        source: &mut dyn Read,
        target: Option<BranchName>,
    ) -> FsResult<WriteReceipt> {
        let content = SpooledContent::from_reader(source).map_err(FsError::Io)?;
        self.write(coordinate, content, target)
    }

    /// Finish a write whose upload failed, on the branch it already created.
    ///
    /// Runs upload, commit and merge request; no new branch is made. `branch`
    /// is the one reported by [`WriteError::pending_branch`].
    pub fn resume_upload(
        &self,
        coordinate: &RepositoryCoordinate,
        source: &mut dyn Read,
        branch: BranchName,
        target: Option<BranchName>,
    ) -> FsResult<WriteReceipt> {
        let content = SpooledContent::from_reader(source).map_err(FsError::Io)?;
        let receipt = self
            .begin(coordinate, content, target)?
            .resume_branch(branch)?
            .upload_object()?
            .commit_pointer()?
            .request_merge()?;
        Ok(receipt)
    }

    /// Re-attempt only the merge request of a write that failed at that stage.
    pub fn retry_merge_request(&self, pending: &PendingMergeRequest) -> Result<MergeRequest, WriteError> {
        match self.host.create_merge_request(&pending.repository, &pending.spec) {
            Ok(mr) => {
                info!(
                    branch = %pending.spec.source,
                    path = %pending.path,
                    merge_request = mr.id,
                    "merge request created on retry"
                );
                Ok(mr)
            }
            Err(source) => Err(WriteError::MergeRequest {
                pending: Box::new(pending.clone()),
                source,
            }),
        }
    }
}
