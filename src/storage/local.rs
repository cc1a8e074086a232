//! A repository host backed by a local directory.
//!
//! ```text
//! <root>/
//!   registry.json              repositories, access levels, merge requests
//!   repos/<namespace>/<name>.git   bare repositories
//!   lfs/<aa>/<bb>/<oid>        LFS objects shared by all repositories
//! ```
//!
//! Behaves like a GitLab instance as far as the [`RepositoryHost`] contract
//! goes, including create-vs-update checks on commit actions.

use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::Utc;
use git2::Repository;
use parking_lot::RwLock;
use tracing::debug;

use crate::host::{
    AccessLevel, ActionKind, BranchName, ByteStream, CommitAction, HostError, HostResult,
    MergeRequest, MergeRequestSpec, Page, PageToken, RepositoryHost, RepositoryId,
    RepositoryInfo, TreeEntry, UploadOutcome,
};
use crate::lfs::LfsPointer;
use crate::storage::commit::{CommitBuilder, GitSignature};
use crate::storage::lfs_store::LfsStore;
use crate::storage::refs::RefManager;
use crate::storage::registry::{Registry, StoredMergeRequest};
use crate::storage::repository::GitRepository;
use crate::storage::tree::{self, Located};

const REGISTRY_FILE: &str = "registry.json";
const DEFAULT_PAGE_SIZE: usize = 20;

/// git2-backed [`RepositoryHost`].
pub struct LocalHost {
    root: PathBuf,
    registry: RwLock<Registry>,
    repos: RwLock<HashMap<RepositoryId, GitRepository>>,
    lfs: LfsStore,
    page_size: usize,
    signature: GitSignature,
}

impl LocalHost {
    /// Create the directory layout under `root`.
    pub fn init(root: impl AsRef<Path>) -> HostResult<Self> {
        let root = root.as_ref();
        if root.join(REGISTRY_FILE).exists() {
            return Err(HostError::AlreadyExists(format!("local host at {}", root.display())));
        }
        fs::create_dir_all(root.join("repos"))?;
        fs::create_dir_all(root.join("lfs"))?;
        let registry = Registry::default();
        registry.save(&root.join(REGISTRY_FILE))?;
        Ok(Self::with_registry(root, registry))
    }

    pub fn open(root: impl AsRef<Path>) -> HostResult<Self> {
        let root = root.as_ref();
        let registry = Registry::load(&root.join(REGISTRY_FILE))?;
        Ok(Self::with_registry(root, registry))
    }

    pub fn open_or_init(root: impl AsRef<Path>) -> HostResult<Self> {
        let root = root.as_ref();
        if root.join(REGISTRY_FILE).exists() {
            Self::open(root)
        } else {
            Self::init(root)
        }
    }

    fn with_registry(root: &Path, registry: Registry) -> Self {
        Self {
            root: root.to_path_buf(),
            registry: RwLock::new(registry),
            repos: RwLock::new(HashMap::new()),
            lfs: LfsStore::new(root.join("lfs")),
            page_size: DEFAULT_PAGE_SIZE,
            signature: GitSignature::arcfs(),
        }
    }

    /// Number of repositories per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_signature(mut self, signature: GitSignature) -> Self {
        self.signature = signature;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn repository_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.root.join("repos").join(namespace).join(format!("{}.git", name))
    }

    fn update_registry<T>(&self, f: impl FnOnce(&mut Registry) -> HostResult<T>) -> HostResult<T> {
        let mut registry = self.registry.write();
        let mut updated = registry.clone();
        let result = f(&mut updated)?;
        updated.save(&self.root.join(REGISTRY_FILE))?;
        *registry = updated;
        Ok(result)
    }

    /// Create an empty repository with a `main` default branch.
    pub fn create_repository(&self, namespace: &str, name: &str, access: AccessLevel) -> HostResult<RepositoryInfo> {
        let info = RepositoryInfo {
            id: RepositoryId::new(format!("{}/{}", namespace, name)),
            namespace: namespace.to_string(),
            name: name.to_string(),
            default_branch: BranchName::new("main")
                .map_err(|e| HostError::InvalidResponse(e.to_string()))?,
            access,
        };
        self.update_registry(|registry| {
            if registry.repository(&info.id).is_ok() {
                return Err(HostError::AlreadyExists(format!("repository {}", info.id)));
            }
            let repo = GitRepository::init(
                self.repository_path(namespace, name),
                &info.default_branch,
                &self.signature,
            )?;
            self.repos.write().insert(info.id.clone(), repo);
            registry.repositories.push(info.clone());
            Ok(())
        })?;
        debug!(repo = %info.id, "repository created");
        Ok(info)
    }

    pub fn set_access(&self, repo: &RepositoryId, access: AccessLevel) -> HostResult<()> {
        self.update_registry(|registry| {
            registry.repository_mut(repo)?.access = access;
            Ok(())
        })
    }

    /// Commit `content` at `path` directly on `branch`, bypassing the write flow.
    pub fn seed_file(&self, repo: &RepositoryId, branch: &BranchName, path: &str, content: &[u8]) -> HostResult<String> {
        let exists = self.blob_exists(repo, branch.as_str(), path)?;
        let action = if exists {
            CommitAction::update(path, content)
        } else {
            CommitAction::create(path, content)
        };
        self.commit(repo, branch, &format!("[SEED] {}", path), &[action])
    }

    /// Merge requests opened against `repo`, oldest first.
    pub fn merge_requests(&self, repo: &RepositoryId) -> Vec<MergeRequest> {
        self.registry.read().merge_requests_for(repo)
    }

    pub fn lfs_object_count(&self) -> HostResult<usize> {
        self.lfs.object_count()
    }

    pub fn branches(&self, repo: &RepositoryId) -> HostResult<Vec<BranchName>> {
        self.with_git(repo, |r| RefManager::list_branches(r, None))
    }

    /// Run `f` against the bare repository behind `repo`.
    fn with_git<T>(&self, repo: &RepositoryId, f: impl FnOnce(&Repository) -> HostResult<T>) -> HostResult<T> {
        if let Some(git) = self.repos.read().get(repo).cloned() {
            return git.with_repo(f);
        }
        let path = {
            let registry = self.registry.read();
            let info = registry.repository(repo)?;
            self.repository_path(&info.namespace, &info.name)
        };
        let git = GitRepository::open(path)?;
        self.repos.write().insert(repo.clone(), git.clone());
        git.with_repo(f)
    }
}

fn read_only_blob(repo: &Repository, reference: &str, path: &str) -> HostResult<Option<Vec<u8>>> {
    let commit = repo.find_commit(RefManager::resolve(repo, reference)?)?;
    let root = commit.tree()?;
    match tree::locate(&root, path)? {
        Located::Blob(id) => Ok(Some(repo.find_blob(id)?.content().to_vec())),
        Located::Tree(_) | Located::Missing => Ok(None),
    }
}

impl RepositoryHost for LocalHost {
    fn list_repositories(&self, page: Option<&PageToken>) -> HostResult<Page<RepositoryInfo>> {
        let offset = match page {
            Some(token) => token
                .as_str()
                .parse::<usize>()
                .map_err(|_| HostError::InvalidResponse(format!("bad page token {}", token.as_str())))?,
            None => 0,
        };
        let mut all = self.registry.read().repositories.clone();
        all.sort_by(|a, b| a.id.cmp(&b.id));

        let end = (offset + self.page_size).min(all.len());
        let items = all.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next = (end < all.len()).then(|| PageToken::new(end.to_string()));
        Ok(Page { items, next })
    }

    fn repository(&self, repo: &RepositoryId) -> HostResult<RepositoryInfo> {
        Ok(self.registry.read().repository(repo)?.clone())
    }

    fn list_tree(&self, repo: &RepositoryId, reference: &str, path: &str) -> HostResult<Vec<TreeEntry>> {
        self.with_git(repo, |r| {
            let commit = r.find_commit(RefManager::resolve(r, reference)?)?;
            let root = commit.tree()?;
            let mut entries = Vec::new();
            if let Located::Tree(id) = tree::locate(&root, path)? {
                let subtree = r.find_tree(id)?;
                tree::walk(r, &subtree, path, &mut entries)?;
            }
            Ok(entries)
        })
    }

    fn read_blob(&self, repo: &RepositoryId, reference: &str, path: &str) -> HostResult<ByteStream> {
        let content = self
            .with_git(repo, |r| read_only_blob(r, reference, path))?
            .ok_or_else(|| HostError::NotFound(format!("file {} at {}", path, reference)))?;
        Ok(Box::new(Cursor::new(content)))
    }

    fn blob_exists(&self, repo: &RepositoryId, reference: &str, path: &str) -> HostResult<bool> {
        self.with_git(repo, |r| {
            let commit = r.find_commit(RefManager::resolve(r, reference)?)?;
            Ok(matches!(tree::locate(&commit.tree()?, path)?, Located::Blob(_)))
        })
    }

    fn branch_exists(&self, repo: &RepositoryId, branch: &BranchName) -> HostResult<bool> {
        self.with_git(repo, |r| Ok(RefManager::branch_exists(r, branch)))
    }

    fn create_branch(&self, repo: &RepositoryId, from: &BranchName, branch: &BranchName) -> HostResult<()> {
        self.with_git(repo, |r| {
            let base = RefManager::resolve(r, from.as_str())?;
            RefManager::create_branch(r, branch, base)
        })?;
        debug!(%repo, %from, %branch, "branch created");
        Ok(())
    }

    fn upload_lfs_object(&self, repo: &RepositoryId, pointer: &LfsPointer, body: ByteStream) -> HostResult<UploadOutcome> {
        self.registry.read().repository(repo)?;
        self.lfs.store(pointer, body)
    }

    fn download_lfs_object(&self, repo: &RepositoryId, pointer: &LfsPointer) -> HostResult<ByteStream> {
        self.registry.read().repository(repo)?;
        self.lfs.open(pointer)
    }

    fn commit(&self, repo: &RepositoryId, branch: &BranchName, message: &str, actions: &[CommitAction]) -> HostResult<String> {
        let signature = self.signature.clone();
        let sha = self.with_git(repo, |r| {
            let head = RefManager::resolve(r, branch.as_str())?;
            let mut root = r.find_commit(head)?.tree()?;
            for action in actions {
                let exists = matches!(tree::locate(&root, &action.path)?, Located::Blob(_));
                match (action.kind, exists) {
                    (ActionKind::Create, true) => {
                        return Err(HostError::AlreadyExists(format!("file {}", action.path)))
                    }
                    (ActionKind::Update, false) => {
                        return Err(HostError::NotFound(format!("file {}", action.path)))
                    }
                    _ => {}
                }
                let blob = r.blob(&action.content)?;
                let new_root = tree::insert_blob(r, Some(&root), &action.path, blob)?;
                root = r.find_tree(new_root)?;
            }
            CommitBuilder::new(r)
                .tree(root.id())
                .parent(head)
                .message(message)
                .signature(signature)
                .update_ref(branch.as_ref_path())
                .commit()
        })?;
        debug!(%repo, %branch, commit = %sha, actions = actions.len(), "committed");
        Ok(sha.to_string())
    }

    fn create_merge_request(&self, repo: &RepositoryId, spec: &MergeRequestSpec) -> HostResult<MergeRequest> {
        for branch in [&spec.source, &spec.target] {
            if !self.branch_exists(repo, branch)? {
                return Err(HostError::NotFound(format!("branch {}", branch)));
            }
        }
        let merge_request = self.update_registry(|registry| {
            registry.repository(repo)?;
            let merge_request = MergeRequest {
                id: registry.next_merge_request_id(),
                source: spec.source.clone(),
                target: spec.target.clone(),
                title: spec.title.clone(),
                description: spec.description.clone(),
                web_url: None,
                created_at: Utc::now(),
            };
            registry.merge_requests.push(StoredMergeRequest {
                repository: repo.clone(),
                merge_request: merge_request.clone(),
            });
            Ok(merge_request)
        })?;
        debug!(%repo, id = merge_request.id, "merge request opened");
        Ok(merge_request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LocalHost, RepositoryInfo) {
        let dir = TempDir::new().unwrap();
        let host = LocalHost::init(dir.path()).unwrap();
        let info = host
            .create_repository("alice.smith", "myarc", AccessLevel::Write)
            .unwrap();
        (dir, host, info)
    }

    fn main_branch() -> BranchName {
        BranchName::new("main").unwrap()
    }

    fn read(host: &LocalHost, repo: &RepositoryId, reference: &str, path: &str) -> Vec<u8> {
        let mut out = Vec::new();
        host.read_blob(repo, reference, path)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_init_open_and_duplicate_init() {
        let (dir, host, info) = setup();
        drop(host);

        assert!(LocalHost::init(dir.path()).err().unwrap().is_already_exists());
        let host = LocalHost::open(dir.path()).unwrap();
        assert_eq!(host.repository(&info.id).unwrap(), info);

        let host = LocalHost::open_or_init(dir.path()).unwrap();
        assert_eq!(host.branches(&info.id).unwrap(), vec![main_branch()]);
    }

    #[test]
    fn test_duplicate_repository() {
        let (_dir, host, _) = setup();
        let err = host
            .create_repository("alice.smith", "myarc", AccessLevel::Read)
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_pagination() {
        let dir = TempDir::new().unwrap();
        let host = LocalHost::init(dir.path()).unwrap().with_page_size(2);
        for name in ["a", "b", "c"] {
            host.create_repository("lab", name, AccessLevel::Read).unwrap();
        }

        let first = host.list_repositories(None).unwrap();
        assert_eq!(first.items.len(), 2);
        let second = host.list_repositories(first.next.as_ref()).unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.next.is_none());
        assert_eq!(second.items[0].name, "c");
    }

    #[test]
    fn test_seed_list_and_read() {
        let (_dir, host, info) = setup();
        host.seed_file(&info.id, &main_branch(), "data/readme.txt", b"hello")
            .unwrap();

        let entries = host.list_tree(&info.id, "main", "").unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["data", "data/readme.txt"]);

        let entries = host.list_tree(&info.id, "main", "data").unwrap();
        assert_eq!(entries, vec![TreeEntry::blob("data/readme.txt", false)]);

        // blob paths and missing paths list as empty
        assert!(host.list_tree(&info.id, "main", "data/readme.txt").unwrap().is_empty());
        assert!(host.list_tree(&info.id, "main", "nope").unwrap().is_empty());

        assert_eq!(read(&host, &info.id, "main", "data/readme.txt"), b"hello");
        assert!(host.blob_exists(&info.id, "main", "data/readme.txt").unwrap());
        assert!(!host.blob_exists(&info.id, "main", "data").unwrap());
    }

    #[test]
    fn test_unknown_repo_and_ref() {
        let (_dir, host, info) = setup();
        let missing = RepositoryId::new("bob/none");
        assert!(host.list_tree(&missing, "main", "").unwrap_err().is_not_found());
        assert!(host.list_tree(&info.id, "nope", "").unwrap_err().is_not_found());
        assert!(host
            .read_blob(&info.id, "main", "nope.txt")
            .err()
            .unwrap()
            .is_not_found());
    }

    #[test]
    fn test_branch_and_commit_actions() {
        let (_dir, host, info) = setup();
        let branch = BranchName::new("upload/test").unwrap();
        host.create_branch(&info.id, &main_branch(), &branch).unwrap();
        assert!(host
            .create_branch(&info.id, &main_branch(), &branch)
            .unwrap_err()
            .is_already_exists());

        host.commit(&info.id, &branch, "[CREATE] a.txt", &[CommitAction::create("a.txt", "1")])
            .unwrap();
        let err = host
            .commit(&info.id, &branch, "again", &[CommitAction::create("a.txt", "2")])
            .unwrap_err();
        assert!(err.is_already_exists());
        let err = host
            .commit(&info.id, &branch, "missing", &[CommitAction::update("b.txt", "2")])
            .unwrap_err();
        assert!(err.is_not_found());

        assert_eq!(read(&host, &info.id, branch.as_str(), "a.txt"), b"1");
        // main is untouched
        assert!(!host.blob_exists(&info.id, "main", "a.txt").unwrap());
    }

    #[test]
    fn test_merge_requests_persist() {
        let (dir, host, info) = setup();
        let branch = BranchName::new("upload/test").unwrap();
        host.create_branch(&info.id, &main_branch(), &branch).unwrap();

        let spec = MergeRequestSpec {
            source: branch.clone(),
            target: main_branch(),
            title: "Upload a.txt".to_string(),
            description: String::new(),
        };
        let mr = host.create_merge_request(&info.id, &spec).unwrap();
        assert_eq!(mr.id, 1);

        let reopened = LocalHost::open(dir.path()).unwrap();
        assert_eq!(reopened.merge_requests(&info.id), vec![mr]);

        let bad = MergeRequestSpec {
            source: BranchName::new("upload/missing").unwrap(),
            ..spec
        };
        assert!(host.create_merge_request(&info.id, &bad).unwrap_err().is_not_found());
    }

    #[test]
    fn test_lfs_round_trip() {
        let (_dir, host, info) = setup();
        let pointer = LfsPointer::from_content(b"large");
        let outcome = host
            .upload_lfs_object(&info.id, &pointer, Box::new(Cursor::new(b"large".to_vec())))
            .unwrap();
        assert_eq!(outcome, UploadOutcome::Stored);
        assert_eq!(host.lfs_object_count().unwrap(), 1);

        let mut out = Vec::new();
        host.download_lfs_object(&info.id, &pointer)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"large");
    }
}
