//! Fault injection around [`LocalHost`] for write-path tests.

use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::host::{
    BranchName, ByteStream, CommitAction, HostError, HostResult, MergeRequest, MergeRequestSpec,
    Page, PageToken, RepositoryHost, RepositoryId, RepositoryInfo, TreeEntry, UploadOutcome,
};
use crate::lfs::LfsPointer;
use crate::storage::LocalHost;

/// Faults are armed with a count and fire on that many subsequent calls.
#[derive(Default)]
pub struct Faults {
    /// create the branch, then report a timeout
    pub branch_timeout_after_create: AtomicUsize,
    /// report a timeout without creating the branch
    pub branch_timeout_before_create: AtomicUsize,
    /// cut the upload body off halfway with a connection abort
    pub interrupted_uploads: AtomicUsize,
    /// fail merge request creation with a transport error
    pub merge_request_failures: AtomicUsize,
}

fn fire(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub struct FlakyHost {
    inner: Arc<LocalHost>,
    pub faults: Faults,
    pub create_branch_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
}

impl FlakyHost {
    pub fn new(inner: Arc<LocalHost>) -> Self {
        Self {
            inner,
            faults: Faults::default(),
            create_branch_calls: AtomicUsize::new(0),
            upload_calls: AtomicUsize::new(0),
        }
    }

    pub fn arm(counter: &AtomicUsize, times: usize) {
        counter.store(times, Ordering::SeqCst);
    }
}

/// Yields `remaining` bytes of `inner`, then fails like a dropped connection.
struct Interrupting {
    inner: ByteStream,
    remaining: u64,
}

impl Read for Interrupting {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "connection aborted"));
        }
        let limit = buf.len().min(self.remaining as usize);
        let n = self.inner.read(&mut buf[..limit])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

impl RepositoryHost for FlakyHost {
    fn list_repositories(&self, page: Option<&PageToken>) -> HostResult<Page<RepositoryInfo>> {
        self.inner.list_repositories(page)
    }

    fn repository(&self, repo: &RepositoryId) -> HostResult<RepositoryInfo> {
        self.inner.repository(repo)
    }

    fn list_tree(&self, repo: &RepositoryId, reference: &str, path: &str) -> HostResult<Vec<TreeEntry>> {
        self.inner.list_tree(repo, reference, path)
    }

    fn read_blob(&self, repo: &RepositoryId, reference: &str, path: &str) -> HostResult<ByteStream> {
        self.inner.read_blob(repo, reference, path)
    }

    fn blob_exists(&self, repo: &RepositoryId, reference: &str, path: &str) -> HostResult<bool> {
        self.inner.blob_exists(repo, reference, path)
    }

    fn branch_exists(&self, repo: &RepositoryId, branch: &BranchName) -> HostResult<bool> {
        self.inner.branch_exists(repo, branch)
    }

    fn create_branch(&self, repo: &RepositoryId, from: &BranchName, branch: &BranchName) -> HostResult<()> {
        self.create_branch_calls.fetch_add(1, Ordering::SeqCst);
        if fire(&self.faults.branch_timeout_before_create) {
            return Err(HostError::Timeout(format!("create branch {}", branch)));
        }
        self.inner.create_branch(repo, from, branch)?;
        if fire(&self.faults.branch_timeout_after_create) {
            return Err(HostError::Timeout(format!("create branch {}", branch)));
        }
        Ok(())
    }

    fn upload_lfs_object(&self, repo: &RepositoryId, pointer: &LfsPointer, body: ByteStream) -> HostResult<UploadOutcome> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if fire(&self.faults.interrupted_uploads) {
            let cut = Interrupting {
                inner: body,
                remaining: pointer.size / 2,
            };
            return self.inner.upload_lfs_object(repo, pointer, Box::new(cut));
        }
        self.inner.upload_lfs_object(repo, pointer, body)
    }

    fn download_lfs_object(&self, repo: &RepositoryId, pointer: &LfsPointer) -> HostResult<ByteStream> {
        self.inner.download_lfs_object(repo, pointer)
    }

    fn commit(&self, repo: &RepositoryId, branch: &BranchName, message: &str, actions: &[CommitAction]) -> HostResult<String> {
        self.inner.commit(repo, branch, message, actions)
    }

    fn create_merge_request(&self, repo: &RepositoryId, spec: &MergeRequestSpec) -> HostResult<MergeRequest> {
        if fire(&self.faults.merge_request_failures) {
            return Err(HostError::Transport("connection reset".to_string()));
        }
        self.inner.create_merge_request(repo, spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArcFsConfig;
    use crate::error::{ErrorKind, FsError};
    use crate::fs::ArcFs;
    use crate::host::AccessLevel;
    use crate::write::WriteStage;
    use tempfile::TempDir;

    const PATH: &str = "alice_smith-myarc/runs/output.bin";

    struct Fixture {
        _dir: TempDir,
        local: Arc<LocalHost>,
        flaky: Arc<FlakyHost>,
        info: RepositoryInfo,
        fs: ArcFs,
    }

    fn setup(config: ArcFsConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        let local = Arc::new(LocalHost::init(dir.path()).unwrap());
        let info = local
            .create_repository("alice.smith", "myarc", AccessLevel::Write)
            .unwrap();
        let flaky = Arc::new(FlakyHost::new(local.clone()));
        let fs = ArcFs::new(flaky.clone(), config);
        Fixture {
            _dir: dir,
            local,
            flaky,
            info,
            fs,
        }
    }

    fn content() -> Vec<u8> {
        (0..64 * 1024).map(|i| (i % 13) as u8).collect()
    }

    fn upload_branches(f: &Fixture) -> Vec<BranchName> {
        f.local
            .branches(&f.info.id)
            .unwrap()
            .into_iter()
            .filter(BranchName::is_upload_branch)
            .collect()
    }

    fn write_error(err: FsError) -> crate::write::WriteError {
        match err {
            FsError::Write(err) => err,
            other => panic!("expected a write error, got {other:?}"),
        }
    }

    #[test]
    fn test_interrupted_upload_is_resent() {
        let f = setup(ArcFsConfig::default());
        FlakyHost::arm(&f.flaky.faults.interrupted_uploads, 1);

        let data = content();
        let receipt = f.fs.upload(PATH, &mut &data[..], None).unwrap();

        assert_eq!(f.flaky.upload_calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.local.lfs_object_count().unwrap(), 1);
        assert_eq!(upload_branches(&f), vec![receipt.branch.clone()]);
        assert_eq!(f.local.merge_requests(&f.info.id).len(), 1);
    }

    #[test]
    fn test_failed_upload_resumes_on_its_branch() {
        let f = setup(ArcFsConfig::default().max_upload_attempts(2));
        FlakyHost::arm(&f.flaky.faults.interrupted_uploads, 2);

        let data = content();
        let err = f.fs.upload(PATH, &mut &data[..], None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upload);
        let err = write_error(err);
        assert!(err.is_retriable());
        assert_eq!(err.stage(), WriteStage::ObjectUploaded);
        let branch = err.pending_branch().cloned().unwrap();
        assert_eq!(upload_branches(&f), vec![branch.clone()]);
        assert_eq!(f.local.lfs_object_count().unwrap(), 0);
        assert!(f.local.merge_requests(&f.info.id).is_empty());

        let receipt = f.fs.resume_upload(PATH, &mut &data[..], branch.clone(), None).unwrap();
        assert_eq!(receipt.branch, branch);
        assert_eq!(upload_branches(&f), vec![branch.clone()]);
        assert_eq!(f.flaky.create_branch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.local.lfs_object_count().unwrap(), 1);
        let mrs = f.local.merge_requests(&f.info.id);
        assert_eq!(mrs.len(), 1);
        assert_eq!(mrs[0].source, branch);

        let on_branch = format!(
            "alice_smith-myarc@{}/runs/output.bin",
            crate::resolver::encode_ref(branch.as_str())
        );
        let mut read = Vec::new();
        f.fs.download(&on_branch, &mut read).unwrap();
        assert_eq!(read, data);
    }

    #[test]
    fn test_branch_created_despite_timeout_is_adopted() {
        let f = setup(ArcFsConfig::default());
        FlakyHost::arm(&f.flaky.faults.branch_timeout_after_create, 1);

        let receipt = f.fs.upload(PATH, &mut &b"payload"[..], None).unwrap();
        assert_eq!(f.flaky.create_branch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(upload_branches(&f), vec![receipt.branch]);
    }

    #[test]
    fn test_branch_timeout_without_creation_is_retried() {
        let f = setup(ArcFsConfig::default());
        FlakyHost::arm(&f.flaky.faults.branch_timeout_before_create, 1);

        let receipt = f.fs.upload(PATH, &mut &b"payload"[..], None).unwrap();
        assert_eq!(f.flaky.create_branch_calls.load(Ordering::SeqCst), 2);
        assert_eq!(upload_branches(&f), vec![receipt.branch]);
    }

    #[test]
    fn test_branch_attempts_are_bounded() {
        let f = setup(ArcFsConfig::default().max_branch_attempts(3));
        FlakyHost::arm(&f.flaky.faults.branch_timeout_before_create, 10);

        let err = f.fs.upload(PATH, &mut &b"payload"[..], None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BranchCreation);
        let err = write_error(err);
        assert!(err.is_retriable());
        assert!(matches!(
            err,
            crate::write::WriteError::BranchCreation {
                attempts: 3,
                source: Some(HostError::Timeout(_))
            }
        ));
        assert!(upload_branches(&f).is_empty());
        assert_eq!(f.local.lfs_object_count().unwrap(), 0);
    }

    #[test]
    fn test_merge_request_failure_keeps_commit_and_retries_alone() {
        let f = setup(ArcFsConfig::default());
        FlakyHost::arm(&f.flaky.faults.merge_request_failures, 1);

        let err = f.fs.upload(PATH, &mut &b"payload"[..], None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MergeRequest);
        let err = write_error(err);
        assert!(!err.is_retriable());
        let pending = err.pending_merge_request().cloned().unwrap();
        assert_eq!(pending.spec.target, f.info.default_branch);
        assert!(!pending.commit.is_empty());
        assert!(f.local.merge_requests(&f.info.id).is_empty());

        let mr = f.fs.retry_merge_request(&pending).unwrap();
        assert_eq!(mr.source, pending.spec.source);
        assert_eq!(f.local.merge_requests(&f.info.id), vec![mr]);
        assert_eq!(upload_branches(&f), vec![pending.spec.source.clone()]);
        assert_eq!(f.flaky.upload_calls.load(Ordering::SeqCst), 1);
    }
}
