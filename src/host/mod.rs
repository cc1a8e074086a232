//! The repository host seam.
//!
//! Everything the filesystem needs from a git hosting service goes through the
//! [`RepositoryHost`] trait. The core (resolver, listing, reader, write
//! orchestrator) is written against this trait only.
//!
//! ```text
//!                    ┌──────────────────────┐
//!                    │   RepositoryHost     │
//!                    └──────────────────────┘
//!                       ▲                ▲
//!          ┌────────────┘                └────────────┐
//!   ┌─────────────┐                            ┌─────────────┐
//!   │ GitLabHost  │  REST v4 + LFS batch API   │  LocalHost  │  git2 + object dir
//!   └─────────────┘                            └─────────────┘
//! ```
//!
//! Implementations handle their own authentication, pagination of tree
//! listings and transport retries below the level of a single call.

mod error;
mod types;

use std::io::Read;

pub use error::{HostError, HostResult};
pub use types::{
    AccessLevel, ActionKind, BranchName, CommitAction, EntryKind, InvalidNameError,
    MergeRequest, MergeRequestSpec, Page, PageToken, RepositoryId, RepositoryInfo, TreeEntry,
    UploadOutcome,
};

use crate::lfs::LfsPointer;

/// A byte stream handed out by a host.
pub type ByteStream = Box<dyn Read + Send>;

/// Operations a repository host must provide.
///
/// All calls are blocking. `reference` arguments accept any ref the host can
/// resolve (branch names in practice).
pub trait RepositoryHost: Send + Sync {
    /// One page of the repositories visible to the credential.
    fn list_repositories(&self, page: Option<&PageToken>) -> HostResult<Page<RepositoryInfo>>;

    /// Fresh metadata for a single repository.
    fn repository(&self, repo: &RepositoryId) -> HostResult<RepositoryInfo>;

    /// All entries below `path` (recursive). `path` is `""` for the root.
    ///
    /// A path that does not exist, or names a blob, yields an empty listing.
    /// An unknown repository or ref is `NotFound`.
    fn list_tree(&self, repo: &RepositoryId, reference: &str, path: &str)
        -> HostResult<Vec<TreeEntry>>;

    /// Raw blob content as stored in git (pointer text for LFS files).
    fn read_blob(&self, repo: &RepositoryId, reference: &str, path: &str) -> HostResult<ByteStream>;

    fn blob_exists(&self, repo: &RepositoryId, reference: &str, path: &str) -> HostResult<bool>;

    fn branch_exists(&self, repo: &RepositoryId, branch: &BranchName) -> HostResult<bool>;

    /// Create `branch` at the head of `from`. `AlreadyExists` on collision.
    fn create_branch(&self, repo: &RepositoryId, from: &BranchName, branch: &BranchName)
        -> HostResult<()>;

    /// Store an LFS object. Must succeed with `AlreadyPresent` if the oid is known.
    fn upload_lfs_object(
        &self,
        repo: &RepositoryId,
        pointer: &LfsPointer,
        body: ByteStream,
    ) -> HostResult<UploadOutcome>;

    fn download_lfs_object(&self, repo: &RepositoryId, pointer: &LfsPointer) -> HostResult<ByteStream>;

    /// Apply `actions` as a single commit on `branch`; returns the commit sha.
    fn commit(
        &self,
        repo: &RepositoryId,
        branch: &BranchName,
        message: &str,
        actions: &[CommitAction],
    ) -> HostResult<String>;

    fn create_merge_request(&self, repo: &RepositoryId, spec: &MergeRequestSpec)
        -> HostResult<MergeRequest>;
}
