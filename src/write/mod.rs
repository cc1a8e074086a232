//! Merge-request mediated writes.
//!
//! A write never touches the default branch. Every file write becomes:
//!
//! 1. an access check on the repository,
//! 2. a fresh `upload/<ulid>` branch from the base ref,
//! 3. an LFS upload of the content,
//! 4. one commit with the pointer file and its `.gitattributes` entry,
//! 5. a merge request back into the base (or an explicit target) branch.
//!
//! Failures carry the stage they happened in. A branch failure leaves nothing
//! behind. An upload failure leaves an empty upload branch, which
//! [`WriteOrchestrator::resume_upload`] picks up again. After a merge request
//! failure only that step should be repeated, see
//! [`WriteOrchestrator::retry_merge_request`].

mod error;
mod orchestrator;
mod spool;
mod transaction;

use std::fmt;

pub use error::{PendingMergeRequest, WriteError};
pub use orchestrator::WriteOrchestrator;
pub use spool::{SpooledContent, Spooler};
pub use transaction::{
    commit_message, Branched, Committed, StageMarker, Started, Uploaded, WriteLimits,
    WriteMetadata, WriteReceipt, WriteTransaction, GITATTRIBUTES,
};

/// Stages of a write transaction, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WriteStage {
    Init,
    BranchEnsured,
    ObjectUploaded,
    PointerCommitted,
    MergeRequested,
    Done,
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteStage::Init => "init",
            WriteStage::BranchEnsured => "branch-ensured",
            WriteStage::ObjectUploaded => "object-uploaded",
            WriteStage::PointerCommitted => "pointer-committed",
            WriteStage::MergeRequested => "merge-requested",
            WriteStage::Done => "done",
        };
        f.write_str(name)
    }
}
