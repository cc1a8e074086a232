//! Bare git repository wrapper.
//!
//! Wraps `git2::Repository` with locked access. Clone it to share across
//! threads; it uses `Arc` internally.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{Repository, RepositoryInitOptions};
use parking_lot::Mutex;

use crate::host::{BranchName, HostError, HostResult};
use crate::storage::commit::{self, GitSignature};
use crate::storage::refs::RefManager;

/// A bare repository on disk.
#[derive(Clone)]
pub struct GitRepository {
    inner: Arc<GitRepositoryInner>,
}

struct GitRepositoryInner {
    repo: Mutex<Repository>,
    path: PathBuf,
}

impl GitRepository {
    /// Open an existing bare repository.
    pub fn open(path: impl AsRef<Path>) -> HostResult<Self> {
        let path = path.as_ref();
        let repo = Repository::open_bare(path)
            .map_err(|_| HostError::NotFound(format!("repository at {}", path.display())))?;
        Ok(Self::wrap(repo, path))
    }

    /// Initialize a bare repository whose `default_branch` holds one empty commit.
    pub fn init(path: impl AsRef<Path>, default_branch: &BranchName, signature: &GitSignature) -> HostResult<Self> {
        let path = path.as_ref();
        let mut opts = RepositoryInitOptions::new();
        opts.bare(true).initial_head(default_branch.as_str()).mkpath(true);
        let repo = Repository::init_opts(path, &opts)?;

        let storage = Self::wrap(repo, path);
        storage.with_repo(|repo| {
            let initial = commit::create_initial_commit(repo, signature)?;
            RefManager::init_default_branch(repo, default_branch, initial)
        })?;
        Ok(storage)
    }

    fn wrap(repo: Repository, path: &Path) -> Self {
        Self {
            inner: Arc::new(GitRepositoryInner {
                repo: Mutex::new(repo),
                path: path.to_path_buf(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Execute a function with exclusive access to the repository.
    pub fn with_repo<F, T>(&self, f: F) -> HostResult<T>
    where
        F: FnOnce(&Repository) -> HostResult<T>,
    {
        let repo = self.inner.repo.lock();
        f(&repo)
    }
}
