//! Write transaction using the typestate pattern.
//!
//! Each stage is a method that consumes the transaction and returns it in the
//! next state, so stages cannot be skipped or reordered:
//!
//! ```text
//! Started ──ensure_branch──▶ Branched ──upload_object──▶ Uploaded
//!    ──commit_pointer──▶ Committed ──request_merge──▶ WriteReceipt
//! ```

use std::io::Read;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{FsError, FsResult};
use crate::host::{
    ActionKind, BranchName, CommitAction, HostError, HostResult, MergeRequest, MergeRequestSpec,
    RepositoryHost, RepositoryId, UploadOutcome,
};
use crate::lfs::{self, LfsPointer};
use crate::resolver::RepositoryCoordinate;
use crate::write::error::{PendingMergeRequest, WriteError};
use crate::write::spool::SpooledContent;
use crate::write::WriteStage;

/// Name of the attributes file that routes paths through LFS.
pub const GITATTRIBUTES: &str = ".gitattributes";

/// Marker for a transaction that passed the access check.
#[derive(Debug)]
pub struct Started;

/// State of a transaction that owns an upload branch.
#[derive(Debug)]
pub struct Branched {
    branch: BranchName,
}

/// State of a transaction whose object is stored on the host.
#[derive(Debug)]
pub struct Uploaded {
    branch: BranchName,
    upload: UploadOutcome,
}

/// State of a transaction whose pointer is committed.
#[derive(Debug)]
pub struct Committed {
    branch: BranchName,
    upload: UploadOutcome,
    action: ActionKind,
    commit: String,
}

/// Ties a marker type to the stage it represents.
pub trait StageMarker {
    const STAGE: WriteStage;
}

impl StageMarker for Started {
    const STAGE: WriteStage = WriteStage::Init;
}

impl StageMarker for Branched {
    const STAGE: WriteStage = WriteStage::BranchEnsured;
}

impl StageMarker for Uploaded {
    const STAGE: WriteStage = WriteStage::ObjectUploaded;
}

impl StageMarker for Committed {
    const STAGE: WriteStage = WriteStage::PointerCommitted;
}

/// Retry bounds for a transaction.
#[derive(Debug, Clone, Copy)]
pub struct WriteLimits {
    pub max_branch_attempts: u32,
    pub max_upload_attempts: u32,
}

/// Transaction metadata, filled in as stages complete.
#[derive(Debug, Clone)]
pub struct WriteMetadata {
    pub tx_id: String,
    pub repository: RepositoryId,
    /// in-repository path being written
    pub path: String,
    /// ref the upload branch is created from
    pub base: BranchName,
    /// branch the merge request targets
    pub target: BranchName,
    pub pointer: LfsPointer,
    pub branch: Option<BranchName>,
    pub upload: Option<UploadOutcome>,
    pub commit: Option<String>,
    pub action: Option<ActionKind>,
    pub started_at: DateTime<Utc>,
}

/// Outcome of a completed write.
#[derive(Debug, Clone)]
pub struct WriteReceipt {
    pub tx_id: String,
    pub repository: RepositoryId,
    pub path: String,
    pub branch: BranchName,
    pub commit: String,
    pub pointer: LfsPointer,
    pub action: ActionKind,
    pub upload: UploadOutcome,
    pub merge_request: MergeRequest,
}

/// A single logical file write, exclusively owned by its caller.
pub struct WriteTransaction<State> {
    metadata: WriteMetadata,
    host: Arc<dyn RepositoryHost>,
    content: SpooledContent,
    limits: WriteLimits,
    state: State,
}

impl<State: StageMarker> WriteTransaction<State> {
    pub fn id(&self) -> &str {
        &self.metadata.tx_id
    }

    pub fn metadata(&self) -> &WriteMetadata {
        &self.metadata
    }

    /// The last stage this transaction completed.
    pub fn stage(&self) -> WriteStage {
        State::STAGE
    }

    fn advance<Next: StageMarker>(self, state: Next) -> WriteTransaction<Next> {
        info!(
            tx = %self.metadata.tx_id,
            path = %self.metadata.path,
            from = %State::STAGE,
            to = %Next::STAGE,
            "write stage complete"
        );
        WriteTransaction {
            metadata: self.metadata,
            host: self.host,
            content: self.content,
            limits: self.limits,
            state,
        }
    }
}

impl WriteTransaction<Started> {
    /// Check that the repository exists and is writable.
    ///
    /// Fails with `NotFound` or `PermissionDenied`; nothing is created on the host.
    pub fn begin(
        host: Arc<dyn RepositoryHost>,
        limits: WriteLimits,
        coordinate: &RepositoryCoordinate,
        content: SpooledContent,
        target: Option<BranchName>,
    ) -> FsResult<Self> {
        let location = coordinate.to_string();
        if coordinate.is_repository_root() {
            return Err(FsError::FileExpected(location));
        }
        let info = host
            .repository(&coordinate.repository_id)
            .map_err(|e| FsError::from_host(e, &coordinate.directory_name()))?;
        if !info.access.can_write() {
            return Err(FsError::PermissionDenied(format!(
                "no write access to {}",
                coordinate.directory_name()
            )));
        }

        let base = BranchName::new(coordinate.reference.clone())
            .map_err(|e| FsError::invalid_path(&location, format!("cannot branch from ref: {}", e)))?;
        let metadata = WriteMetadata {
            tx_id: ulid::Ulid::new().to_string().to_lowercase(),
            repository: coordinate.repository_id.clone(),
            path: coordinate.path(),
            target: target.unwrap_or_else(|| base.clone()),
            base,
            pointer: content.pointer().clone(),
            branch: None,
            upload: None,
            commit: None,
            action: None,
            started_at: Utc::now(),
        };
        info!(
            tx = %metadata.tx_id,
            path = %location,
            size = metadata.pointer.size,
            "write started"
        );

        Ok(Self {
            metadata,
            host,
            content,
            limits,
            state: Started,
        })
    }

    /// Create a uniquely named upload branch from the base ref.
    ///
    /// Names that already exist are replaced by fresh ones. After a timeout the
    /// branch is looked up before anything else happens, and adopted if the
    /// host did create it.
    pub fn ensure_branch(self) -> Result<WriteTransaction<Branched>, WriteError> {
        let repo = self.metadata.repository.clone();
        let max = self.limits.max_branch_attempts.max(1);
        let mut candidate = BranchName::generate_upload();
        // the candidate may exist because an earlier attempt on it timed out
        let mut uncertain = false;
        let mut last_error = None;

        for attempt in 1..=max {
            match self.host.branch_exists(&repo, &candidate) {
                Ok(true) if uncertain => return Ok(self.adopt_branch(candidate)),
                Ok(true) => {
                    warn!(tx = %self.metadata.tx_id, branch = %candidate, attempt, "branch name taken");
                    candidate = BranchName::generate_upload();
                    continue;
                }
                Ok(false) => {}
                Err(err) if err.is_retriable() => {
                    warn!(tx = %self.metadata.tx_id, %err, attempt, "branch lookup failed");
                    last_error = Some(err);
                    continue;
                }
                Err(err) => {
                    return Err(WriteError::BranchCreation {
                        attempts: attempt,
                        source: Some(err),
                    })
                }
            }

            match self.host.create_branch(&repo, &self.metadata.base, &candidate) {
                Ok(()) => return Ok(self.adopt_branch(candidate)),
                Err(err) if err.is_already_exists() && uncertain => {
                    return Ok(self.adopt_branch(candidate));
                }
                Err(err) if err.is_already_exists() => {
                    warn!(tx = %self.metadata.tx_id, branch = %candidate, attempt, "branch created concurrently");
                    candidate = BranchName::generate_upload();
                    last_error = Some(err);
                }
                Err(err) if err.is_ambiguous() => {
                    warn!(tx = %self.metadata.tx_id, branch = %candidate, %err, attempt, "ambiguous branch creation");
                    match self.host.branch_exists(&repo, &candidate) {
                        Ok(true) => return Ok(self.adopt_branch(candidate)),
                        Ok(false) => {}
                        Err(lookup) => debug!(%lookup, "re-query after ambiguous creation failed"),
                    }
                    uncertain = true;
                    last_error = Some(err);
                }
                Err(err) if err.is_retriable() => {
                    warn!(tx = %self.metadata.tx_id, %err, attempt, "branch creation failed, retrying");
                    last_error = Some(err);
                }
                Err(err) => {
                    return Err(WriteError::BranchCreation {
                        attempts: attempt,
                        source: Some(err),
                    })
                }
            }
        }

        Err(WriteError::BranchCreation {
            attempts: max,
            source: last_error,
        })
    }

    /// Take over the upload branch of an earlier transaction that failed
    /// before its pointer was committed, instead of creating a new one.
    ///
    /// The branch must still exist on the host.
    pub fn resume_branch(self, branch: BranchName) -> Result<WriteTransaction<Branched>, WriteError> {
        match self.host.branch_exists(&self.metadata.repository, &branch) {
            Ok(true) => {
                info!(tx = %self.metadata.tx_id, %branch, "resuming on existing upload branch");
                Ok(self.adopt_branch(branch))
            }
            Ok(false) => Err(WriteError::BranchCreation {
                attempts: 1,
                source: Some(HostError::NotFound(format!("branch {}", branch))),
            }),
            Err(err) => Err(WriteError::BranchCreation {
                attempts: 1,
                source: Some(err),
            }),
        }
    }

    fn adopt_branch(mut self, branch: BranchName) -> WriteTransaction<Branched> {
        debug!(tx = %self.metadata.tx_id, %branch, "upload branch ready");
        self.metadata.branch = Some(branch.clone());
        self.advance(Branched { branch })
    }
}

impl WriteTransaction<Branched> {
    pub fn branch(&self) -> &BranchName {
        &self.state.branch
    }

    /// Send the object to the host's LFS store.
    ///
    /// Retriable failures resend the same bytes under the same oid; an
    /// "already stored" answer counts as success.
    pub fn upload_object(mut self) -> Result<WriteTransaction<Uploaded>, WriteError> {
        let branch = self.state.branch.clone();
        let pointer = self.metadata.pointer.clone();
        let max = self.limits.max_upload_attempts.max(1);
        let upload_error = |attempts, source| WriteError::Upload {
            branch: branch.clone(),
            oid: pointer.oid.clone(),
            attempts,
            source,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let body = self
                .content
                .open()
                .map_err(|e| upload_error(attempt, HostError::Io(e)))?;
            match self
                .host
                .upload_lfs_object(&self.metadata.repository, &pointer, body)
            {
                Ok(outcome) => {
                    debug!(tx = %self.metadata.tx_id, %pointer, ?outcome, attempt, "object stored");
                    self.metadata.upload = Some(outcome);
                    return Ok(self.advance(Uploaded {
                        branch: branch.clone(),
                        upload: outcome,
                    }));
                }
                Err(err) if err.is_retriable() && attempt < max => {
                    warn!(tx = %self.metadata.tx_id, %err, attempt, "upload failed, resending");
                }
                Err(err) => return Err(upload_error(attempt, err)),
            }
        }
    }
}

impl WriteTransaction<Uploaded> {
    /// Commit the pointer file, plus the `.gitattributes` entry for it, as one
    /// commit on the upload branch.
    pub fn commit_pointer(mut self) -> Result<WriteTransaction<Committed>, WriteError> {
        let branch = self.state.branch.clone();
        let commit_error = |source| WriteError::Commit {
            branch: branch.clone(),
            path: self.metadata.path.clone(),
            source,
        };

        let repo = &self.metadata.repository;
        let path = self.metadata.path.as_str();
        let existed = self
            .host
            .blob_exists(repo, self.metadata.base.as_str(), path)
            .map_err(commit_error)?;
        let action = if existed {
            ActionKind::Update
        } else {
            ActionKind::Create
        };

        let pointer_text = self.metadata.pointer.to_text();
        let mut actions = vec![match action {
            ActionKind::Create => CommitAction::create(path, pointer_text),
            ActionKind::Update => CommitAction::update(path, pointer_text),
        }];
        if path != GITATTRIBUTES {
            let existing = read_gitattributes(self.host.as_ref(), repo, &branch).map_err(commit_error)?;
            let current = existing.as_deref().unwrap_or("");
            if let Some(updated) = lfs::track_in_gitattributes(current, path) {
                actions.push(match existing {
                    Some(_) => CommitAction::update(GITATTRIBUTES, updated),
                    None => CommitAction::create(GITATTRIBUTES, updated),
                });
            }
        }

        let message = commit_message(action, path, &self.metadata.tx_id);
        let sha = self
            .host
            .commit(repo, &branch, &message, &actions)
            .map_err(commit_error)?;
        debug!(tx = %self.metadata.tx_id, %branch, commit = %sha, "pointer committed");

        self.metadata.action = Some(action);
        self.metadata.commit = Some(sha.clone());
        let upload = self.state.upload;
        Ok(self.advance(Committed {
            branch,
            upload,
            action,
            commit: sha,
        }))
    }
}

impl WriteTransaction<Committed> {
    /// Everything `retry_merge_request` needs if merge request creation fails.
    pub fn pending_merge_request(&self) -> PendingMergeRequest {
        let meta = &self.metadata;
        PendingMergeRequest {
            repository: meta.repository.clone(),
            path: meta.path.clone(),
            commit: self.state.commit.clone(),
            spec: MergeRequestSpec {
                title: format!("Upload {}", meta.path),
                description: format!(
                    "Adds `{}` as an LFS object ({}).\n\nWrite transaction `{}`, started {}.",
                    meta.path,
                    meta.pointer,
                    meta.tx_id,
                    meta.started_at.to_rfc3339()
                ),
                source: self.state.branch.clone(),
                target: meta.target.clone(),
            },
        }
    }

    /// Open the merge request that finishes the transaction.
    pub fn request_merge(self) -> Result<WriteReceipt, WriteError> {
        let pending = self.pending_merge_request();
        let merge_request = match self.host.create_merge_request(&pending.repository, &pending.spec) {
            Ok(mr) => mr,
            Err(source) => {
                warn!(tx = %self.metadata.tx_id, branch = %pending.spec.source, %source, "merge request failed");
                return Err(WriteError::MergeRequest {
                    pending: Box::new(pending),
                    source,
                });
            }
        };
        info!(
            tx = %self.metadata.tx_id,
            path = %self.metadata.path,
            merge_request = merge_request.id,
            to = %WriteStage::Done,
            "write complete"
        );

        let meta = self.metadata;
        let state = self.state;
        Ok(WriteReceipt {
            tx_id: meta.tx_id,
            repository: meta.repository,
            path: meta.path,
            branch: state.branch,
            commit: state.commit,
            pointer: meta.pointer,
            action: state.action,
            upload: state.upload,
            merge_request,
        })
    }
}

/// `[CREATE] data/big.bin tx:01h...`
pub fn commit_message(action: ActionKind, path: &str, tx_id: &str) -> String {
    let verb = match action {
        ActionKind::Create => "CREATE",
        ActionKind::Update => "UPDATE",
    };
    format!("[{}] {} tx:{}", verb, path, tx_id)
}

fn read_gitattributes(
    host: &dyn RepositoryHost,
    repo: &RepositoryId,
    branch: &BranchName,
) -> HostResult<Option<String>> {
    let mut stream = match host.read_blob(repo, branch.as_str(), GITATTRIBUTES) {
        Ok(stream) => stream,
        Err(err) if err.is_not_found() => return Ok(None),
        Err(err) => return Err(err),
    };
    let mut bytes = Vec::new();
    stream.read_to_end(&mut bytes)?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}
