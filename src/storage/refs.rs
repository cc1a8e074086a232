//! Branch and reference management.
//!
//! Upload branches use a namespaced pattern, `upload/{ulid}`, which keeps
//! them apart from branches people create by hand.

use git2::{BranchType, Oid, Repository};

use crate::host::{BranchName, HostError, HostResult};

/// Manages Git references (branches).
pub struct RefManager;

impl RefManager {
    /// Resolve a branch name, or anything else git can parse, to a commit.
    pub fn resolve(repo: &Repository, reference: &str) -> HostResult<Oid> {
        let not_found = || HostError::NotFound(format!("ref {}", reference));
        if let Ok(branch) = BranchName::new(reference) {
            if let Ok(r) = repo.find_reference(&branch.as_ref_path()) {
                return Ok(r.peel_to_commit().map_err(|_| not_found())?.id());
            }
        }
        let object = repo.revparse_single(reference).map_err(|_| not_found())?;
        Ok(object.peel_to_commit().map_err(|_| not_found())?.id())
    }

    /// Check if a branch exists.
    pub fn branch_exists(repo: &Repository, branch: &BranchName) -> bool {
        repo.find_reference(&branch.as_ref_path()).is_ok()
    }

    /// Create a new branch pointing to the given commit.
    pub fn create_branch(repo: &Repository, branch: &BranchName, target: Oid) -> HostResult<()> {
        if Self::branch_exists(repo, branch) {
            return Err(HostError::AlreadyExists(format!("branch {}", branch)));
        }
        let commit = repo.find_commit(target)?;
        repo.branch(branch.as_str(), &commit, false)?;
        Ok(())
    }

    /// List all branches with an optional prefix filter.
    pub fn list_branches(repo: &Repository, prefix: Option<&str>) -> HostResult<Vec<BranchName>> {
        let mut result = Vec::new();
        for branch_result in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch_result?;
            let Some(name) = branch.name()? else {
                continue;
            };
            if prefix.map_or(true, |p| name.starts_with(p)) {
                if let Ok(branch_name) = BranchName::new(name) {
                    result.push(branch_name);
                }
            }
        }
        result.sort();
        Ok(result)
    }

    /// Point the default branch at the initial commit and HEAD at the branch.
    pub fn init_default_branch(repo: &Repository, branch: &BranchName, initial_commit: Oid) -> HostResult<()> {
        if !Self::branch_exists(repo, branch) {
            Self::create_branch(repo, branch, initial_commit)?;
        }
        repo.set_head(&branch.as_ref_path())?;
        Ok(())
    }
}
