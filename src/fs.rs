//! The filesystem facade.
//!
//! Virtual paths look like `<namespace>-<repository>[@<ref>]/<path...>`,
//! where the namespace has `.` encoded as `_` and `/` as `-`, and `/` inside
//! a ref is written `~`. The root lists every repository the credential can
//! see.

use std::io::{self, Read, Write};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{ArcFsConfig, HostConfig};
use crate::error::{FsError, FsResult};
use crate::gitlab::GitLabHost;
use crate::host::{BranchName, MergeRequest, RepositoryHost};
use crate::index::{Catalog, RepositoryIndex};
use crate::listing::{DirEntry, DirectorySynthesizer};
use crate::reader::{BlobReader, BlobStream};
use crate::resolver::{self, RepositoryCoordinate, Resolved};
use crate::write::{PendingMergeRequest, Spooler, WriteLimits, WriteOrchestrator, WriteReceipt};

/// A repository collection exposed as a filesystem.
pub struct ArcFs {
    config: ArcFsConfig,
    index: RepositoryIndex,
    listing: DirectorySynthesizer,
    reader: BlobReader,
    writer: WriteOrchestrator,
}

impl ArcFs {
    pub fn new(host: Arc<dyn RepositoryHost>, config: ArcFsConfig) -> Self {
        let limits = WriteLimits {
            max_branch_attempts: config.max_branch_attempts,
            max_upload_attempts: config.max_upload_attempts,
        };
        Self {
            index: RepositoryIndex::new(Arc::clone(&host), config.index_ttl),
            listing: DirectorySynthesizer::new(Arc::clone(&host)),
            reader: BlobReader::new(Arc::clone(&host)),
            writer: WriteOrchestrator::new(host, limits),
            config,
        }
    }

    /// Connect to a GitLab instance.
    pub fn connect(host: HostConfig, config: ArcFsConfig) -> FsResult<Self> {
        debug!(host = %host.redacted(), "connecting");
        let gitlab = GitLabHost::new(host, config.request_timeout)?;
        Ok(Self::new(Arc::new(gitlab), config))
    }

    pub fn config(&self) -> &ArcFsConfig {
        &self.config
    }

    /// The repositories visible right now (cached for the index TTL).
    pub fn catalog(&self) -> FsResult<Arc<Catalog>> {
        Ok(self.index.snapshot()?)
    }

    pub fn refresh_index(&self) -> FsResult<()> {
        self.index.refresh()?;
        Ok(())
    }

    pub fn invalidate_index(&self) {
        self.index.invalidate();
    }

    pub fn resolve(&self, path: &str) -> FsResult<Resolved> {
        let catalog = self.index.snapshot()?;
        resolver::resolve(path, &catalog, self.config.ambiguity)
    }

    fn coordinate(&self, path: &str) -> FsResult<Option<RepositoryCoordinate>> {
        match self.resolve(path)? {
            Resolved::Root => Ok(None),
            Resolved::Repository(coordinate) => Ok(Some(coordinate)),
        }
    }

    /// A coordinate that may name a file: not the root, not a repository root.
    fn file_coordinate(&self, path: &str) -> FsResult<RepositoryCoordinate> {
        match self.coordinate(path)? {
            Some(coordinate) if !coordinate.is_repository_root() => Ok(coordinate),
            _ => Err(FsError::FileExpected(path.to_string())),
        }
    }

    /// Entries directly below `path`, sorted by name.
    pub fn list_dir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        let Some(coordinate) = self.coordinate(path)? else {
            let catalog = self.index.snapshot()?;
            return Ok(catalog
                .directory_names()
                .into_iter()
                .map(DirEntry::directory)
                .collect());
        };
        if !coordinate.is_repository_root() {
            match self.listing.stat(&coordinate)? {
                None => return Err(FsError::NotFound(path.to_string())),
                Some(entry) if entry.is_file() => return Err(FsError::DirectoryExpected(path.to_string())),
                Some(_) => {}
            }
        }
        self.listing.list_children(&coordinate)
    }

    /// Name, kind and LFS flag of `path`.
    pub fn info(&self, path: &str) -> FsResult<DirEntry> {
        let Some(coordinate) = self.coordinate(path)? else {
            return Ok(DirEntry::directory(""));
        };
        self.listing
            .stat(&coordinate)?
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    pub fn exists(&self, path: &str) -> FsResult<bool> {
        match self.info(path) {
            Ok(_) => Ok(true),
            Err(FsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// True for directories implied by deeper files as well as real trees.
    pub fn is_dir(&self, path: &str) -> FsResult<bool> {
        match self.info(path) {
            Ok(entry) => Ok(entry.is_dir()),
            Err(FsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn is_file(&self, path: &str) -> FsResult<bool> {
        match self.info(path) {
            Ok(entry) => Ok(entry.is_file()),
            Err(FsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Open a file for reading. LFS pointers are followed transparently.
    pub fn open_read(&self, path: &str) -> FsResult<BlobStream> {
        let coordinate = self.file_coordinate(path)?;
        match self.reader.open_read(&coordinate) {
            Err(FsError::NotFound(missing)) => {
                if self.listing.is_dir(&coordinate)? {
                    Err(FsError::FileExpected(path.to_string()))
                } else {
                    Err(FsError::NotFound(missing))
                }
            }
            other => other,
        }
    }

    /// Copy the content of `path` into `sink`; returns the byte count.
    pub fn download(&self, path: &str, sink: &mut dyn Write) -> FsResult<u64> {
        let mut stream = self.open_read(path)?;
        io::copy(&mut stream, sink).map_err(|e| FsError::from_read(e, path))
    }

    fn writable_coordinate(&self, path: &str) -> FsResult<RepositoryCoordinate> {
        let coordinate = self.file_coordinate(path)?;
        if self.listing.is_dir(&coordinate)? {
            return Err(FsError::FileExpected(path.to_string()));
        }
        Ok(coordinate)
    }

    /// Write `source` to `path` through a new branch and merge request.
    ///
    /// The merge request targets `target`, or the ref the path was resolved
    /// against.
    pub fn upload(&self, path: &str, source: &mut dyn Read, target: Option<BranchName>) -> FsResult<WriteReceipt> {
        let coordinate = self.writable_coordinate(path)?;
        self.writer.write_from(&coordinate, source, target)
    }

    /// Finish a write that failed with an upload error, reusing its branch.
    ///
    /// `branch` comes from [`WriteError::pending_branch`](crate::WriteError::pending_branch);
    /// `source` must yield the content again.
    pub fn resume_upload(
        &self,
        path: &str,
        source: &mut dyn Read,
        branch: BranchName,
        target: Option<BranchName>,
    ) -> FsResult<WriteReceipt> {
        let coordinate = self.writable_coordinate(path)?;
        self.writer.resume_upload(&coordinate, source, branch, target)
    }

    /// A writer whose content is submitted by [`PendingWrite::finish`].
    pub fn open_write(&self, path: &str, target: Option<BranchName>) -> FsResult<PendingWrite> {
        let coordinate = self.writable_coordinate(path)?;
        Ok(PendingWrite {
            writer: self.writer.clone(),
            coordinate,
            target,
            spool: Some(Spooler::new()?),
        })
    }

    /// Re-attempt the merge request of a write that failed at that stage.
    pub fn retry_merge_request(&self, pending: &PendingMergeRequest) -> FsResult<MergeRequest> {
        Ok(self.writer.retry_merge_request(pending)?)
    }

    /// Always succeeds without touching the host. Directories exist only
    /// through the files below them, so `path` stays absent until a file is
    /// written under it.
    pub fn make_dirs(&self, path: &str) -> FsResult<()> {
        debug!(path, "make_dirs is a no-op");
        Ok(())
    }

    pub fn remove(&self, path: &str) -> FsResult<()> {
        Err(FsError::unsupported("remove", path))
    }

    pub fn remove_dir(&self, path: &str) -> FsResult<()> {
        Err(FsError::unsupported("remove_dir", path))
    }

    pub fn set_info(&self, path: &str) -> FsResult<()> {
        Err(FsError::unsupported("set_info", path))
    }
}

/// An open file handle in write mode.
///
/// Bytes go to a local spool; nothing reaches the host before `finish`.
/// Dropping the handle without finishing discards the content.
pub struct PendingWrite {
    writer: WriteOrchestrator,
    coordinate: RepositoryCoordinate,
    target: Option<BranchName>,
    spool: Option<Spooler>,
}

impl PendingWrite {
    pub fn path(&self) -> &RepositoryCoordinate {
        &self.coordinate
    }

    pub fn finish(mut self) -> FsResult<WriteReceipt> {
        let spool = self
            .spool
            .take()
            .ok_or_else(|| FsError::Io(io::Error::other("write already finished")))?;
        let content = spool.finish()?;
        self.writer.write(&self.coordinate, content, self.target.take())
    }
}

impl Write for PendingWrite {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.spool.as_mut() {
            Some(spool) => spool.write(buf),
            None => Err(io::Error::other("write already finished")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.spool.as_mut() {
            Some(spool) => spool.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        if let Some(spool) = &self.spool {
            warn!(
                path = %self.coordinate,
                bytes = spool.bytes_written(),
                "write handle dropped without finish, content discarded"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::host::{AccessLevel, ActionKind, RepositoryInfo, UploadOutcome};
    use crate::resolver::encode_ref;
    use crate::storage::LocalHost;
    use tempfile::TempDir;

    const REPO: &str = "alice_smith-myarc";

    struct Fixture {
        _dir: TempDir,
        host: Arc<LocalHost>,
        info: RepositoryInfo,
        fs: ArcFs,
    }

    fn setup() -> Fixture {
        let dir = TempDir::new().unwrap();
        let host = Arc::new(LocalHost::init(dir.path()).unwrap());
        let info = host
            .create_repository("alice.smith", "myarc", AccessLevel::Write)
            .unwrap();
        host.seed_file(&info.id, &info.default_branch, "data/readme.txt", b"hello arc\n")
            .unwrap();
        let fs = ArcFs::new(host.clone(), ArcFsConfig::default());
        Fixture {
            _dir: dir,
            host,
            info,
            fs,
        }
    }

    fn names(entries: Vec<DirEntry>) -> Vec<String> {
        entries.into_iter().map(|e| e.name).collect()
    }

    fn read_all(fs: &ArcFs, path: &str) -> Vec<u8> {
        let mut out = Vec::new();
        fs.download(path, &mut out).unwrap();
        out
    }

    #[test]
    fn test_listing_scenario() {
        let f = setup();
        assert_eq!(names(f.fs.list_dir("").unwrap()), vec![REPO]);
        assert_eq!(names(f.fs.list_dir(REPO).unwrap()), vec!["data"]);
        assert_eq!(names(f.fs.list_dir("alice_smith-myarc/data").unwrap()), vec!["readme.txt"]);

        assert!(f.fs.is_dir("alice_smith-myarc/data").unwrap());
        assert!(f.fs.is_file("alice_smith-myarc/data/readme.txt").unwrap());
        assert!(!f.fs.exists("alice_smith-myarc/data/nope.txt").unwrap());
        assert!(!f.fs.exists("bob-unknown").unwrap());
        assert!(f.fs.is_dir("/").unwrap());
    }

    #[test]
    fn test_listing_errors() {
        let f = setup();
        let err = f.fs.list_dir("alice_smith-myarc/data/readme.txt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DirectoryExpected);

        let err = f.fs.list_dir("alice_smith-myarc/missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = f.fs.list_dir("alice_smith-myarc/../other").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPath);

        let err = f.fs.list_dir("nodash").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPath);
    }

    #[test]
    fn test_read_plain_file() {
        let f = setup();
        assert_eq!(read_all(&f.fs, "alice_smith-myarc/data/readme.txt"), b"hello arc\n");

        let stream = f.fs.open_read("alice_smith-myarc/data/readme.txt").unwrap();
        assert!(!stream.is_lfs());

        let err = f.fs.open_read("alice_smith-myarc/data").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileExpected);
        let err = f.fs.open_read(REPO).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileExpected);
        let err = f.fs.open_read("alice_smith-myarc/data/nope.txt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_large_write_scenario() {
        let f = setup();
        let content: Vec<u8> = (0..10 * 1024 * 1024).map(|i| (i % 251) as u8).collect();

        let receipt = f
            .fs
            .upload("alice_smith-myarc/big.bin", &mut &content[..], None)
            .unwrap();
        assert!(receipt.branch.is_upload_branch());
        assert_ne!(receipt.branch, f.info.default_branch);
        assert_eq!(receipt.pointer.size, 10_485_760);
        assert_eq!(receipt.action, ActionKind::Create);
        assert_eq!(receipt.upload, UploadOutcome::Stored);

        assert_eq!(f.host.lfs_object_count().unwrap(), 1);
        let merge_requests = f.host.merge_requests(&f.info.id);
        assert_eq!(merge_requests.len(), 1);
        assert_eq!(merge_requests[0].source, receipt.branch);
        assert_eq!(merge_requests[0].target, f.info.default_branch);

        // the default branch is untouched until the merge request is merged
        assert!(!f.fs.exists("alice_smith-myarc/big.bin").unwrap());

        let on_branch = format!("{}@{}/big.bin", REPO, encode_ref(receipt.branch.as_str()));
        assert!(f.fs.info(&on_branch).unwrap().is_lfs_pointer);
        let stream = f.fs.open_read(&on_branch).unwrap();
        assert_eq!(stream.lfs_pointer(), Some(&receipt.pointer));
        assert_eq!(read_all(&f.fs, &on_branch), content);

        let attributes = format!("{}@{}/.gitattributes", REPO, encode_ref(receipt.branch.as_str()));
        let attributes = String::from_utf8(read_all(&f.fs, &attributes)).unwrap();
        assert!(attributes.contains("big.bin filter=lfs diff=lfs merge=lfs -text"));
    }

    #[test]
    fn test_identical_upload_is_idempotent() {
        let f = setup();
        let first = f
            .fs
            .upload("alice_smith-myarc/data/copy.bin", &mut &b"same bytes"[..], None)
            .unwrap();
        let second = f
            .fs
            .upload("alice_smith-myarc/data/copy.bin", &mut &b"same bytes"[..], None)
            .unwrap();

        assert_eq!(second.upload, UploadOutcome::AlreadyPresent);
        assert_eq!(first.pointer, second.pointer);
        assert_ne!(first.branch, second.branch);
        assert_eq!(f.host.lfs_object_count().unwrap(), 1);
        assert_eq!(f.host.merge_requests(&f.info.id).len(), 2);
    }

    #[test]
    fn test_concurrent_writes_to_one_path_stay_independent() {
        let f = setup();
        let path = "alice_smith-myarc/data/shared.bin";
        let contents = [vec![1u8; 4096], vec![2u8; 8192]];

        let fs = &f.fs;
        let receipts: Vec<WriteReceipt> = std::thread::scope(|scope| {
            let handles: Vec<_> = contents
                .iter()
                .map(|content| scope.spawn(move || fs.upload(path, &mut &content[..], None).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_ne!(receipts[0].branch, receipts[1].branch);
        assert_ne!(receipts[0].merge_request.id, receipts[1].merge_request.id);
        assert_eq!(f.host.merge_requests(&f.info.id).len(), 2);
        assert_eq!(f.host.lfs_object_count().unwrap(), 2);
        for (receipt, content) in receipts.iter().zip(&contents) {
            assert_eq!(receipt.action, ActionKind::Create);
            let on_branch = format!("{}@{}/data/shared.bin", REPO, encode_ref(receipt.branch.as_str()));
            assert_eq!(&read_all(&f.fs, &on_branch), content);
        }
        assert!(!f.fs.exists(path).unwrap());
    }

    #[test]
    fn test_overwrite_is_an_update() {
        let f = setup();
        let receipt = f
            .fs
            .upload("alice_smith-myarc/data/readme.txt", &mut &b"new text"[..], None)
            .unwrap();
        assert_eq!(receipt.action, ActionKind::Update);

        let on_branch = format!("{}@{}/data/readme.txt", REPO, encode_ref(receipt.branch.as_str()));
        assert_eq!(read_all(&f.fs, &on_branch), b"new text");
        assert_eq!(read_all(&f.fs, "alice_smith-myarc/data/readme.txt"), b"hello arc\n");
    }

    #[test]
    fn test_explicit_target_branch() {
        let f = setup();
        let target = BranchName::new("staging").unwrap();
        f.host.create_branch(&f.info.id, &f.info.default_branch, &target).unwrap();

        let receipt = f
            .fs
            .upload("alice_smith-myarc/x.bin", &mut &b"x"[..], Some(target.clone()))
            .unwrap();
        assert_eq!(receipt.merge_request.target, target);
    }

    #[test]
    fn test_pending_write_handle() {
        let f = setup();
        let mut handle = f.fs.open_write("alice_smith-myarc/notes/a.txt", None).unwrap();
        handle.write_all(b"part one, ").unwrap();
        handle.write_all(b"part two").unwrap();
        let receipt = handle.finish().unwrap();
        assert_eq!(receipt.pointer.size, 18);

        let branches_before = f.host.branches(&f.info.id).unwrap();
        let mut dropped = f.fs.open_write("alice_smith-myarc/notes/b.txt", None).unwrap();
        dropped.write_all(b"never sent").unwrap();
        drop(dropped);
        assert_eq!(f.host.branches(&f.info.id).unwrap(), branches_before);
        assert_eq!(f.host.merge_requests(&f.info.id).len(), 1);
    }

    #[test]
    fn test_write_rejects_directories_and_read_only() {
        let f = setup();
        let err = f
            .fs
            .upload("alice_smith-myarc/data", &mut &b"x"[..], None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileExpected);

        let shared = f
            .host
            .create_repository("lab", "shared", AccessLevel::Read)
            .unwrap();
        f.fs.refresh_index().unwrap();
        let err = f
            .fs
            .upload("lab-shared/a.txt", &mut &b"x"[..], None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(f.host.branches(&shared.id).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_is_unsupported() {
        let f = setup();
        let branches = f.host.branches(&f.info.id).unwrap();
        for path in ["alice_smith-myarc/data/readme.txt", "alice_smith-myarc/data", "", "bob-x"] {
            assert_eq!(f.fs.remove(path).unwrap_err().kind(), ErrorKind::Unsupported);
            assert_eq!(f.fs.remove_dir(path).unwrap_err().kind(), ErrorKind::Unsupported);
            assert_eq!(f.fs.set_info(path).unwrap_err().kind(), ErrorKind::Unsupported);
        }
        assert_eq!(f.host.branches(&f.info.id).unwrap(), branches);
        assert!(f.host.merge_requests(&f.info.id).is_empty());
        assert!(f.fs.is_file("alice_smith-myarc/data/readme.txt").unwrap());
    }

    #[test]
    fn test_make_dirs_is_not_listed() {
        let f = setup();
        f.fs.make_dirs("alice_smith-myarc/new/deep").unwrap();
        assert_eq!(names(f.fs.list_dir(REPO).unwrap()), vec!["data"]);
        assert!(!f.fs.is_dir("alice_smith-myarc/new").unwrap());

        // no host lookups, so existing files and unknown repositories pass too
        f.fs.make_dirs("alice_smith-myarc/data/readme.txt").unwrap();
        f.fs.make_dirs("carol-unknown/new").unwrap();
        assert!(f.fs.is_file("alice_smith-myarc/data/readme.txt").unwrap());

        f.fs.upload("alice_smith-myarc/new/deep/file.txt", &mut &b"x"[..], None)
            .unwrap();
        // only visible on the upload branch, the default branch listing is unchanged
        assert_eq!(names(f.fs.list_dir(REPO).unwrap()), vec!["data"]);
    }

    #[test]
    fn test_index_is_cached_until_refresh() {
        let f = setup();
        assert_eq!(names(f.fs.list_dir("").unwrap()), vec![REPO]);

        f.host
            .create_repository("bob", "data", AccessLevel::Read)
            .unwrap();
        assert_eq!(names(f.fs.list_dir("").unwrap()), vec![REPO]);

        f.fs.refresh_index().unwrap();
        assert_eq!(names(f.fs.list_dir("").unwrap()), vec![REPO, "bob-data"]);
    }
}
