//! Content-addressed LFS object directory.
//!
//! Objects live at `<root>/<oid[0..2]>/<oid[2..4]>/<oid>`, the same fan-out
//! git-lfs uses under `.git/lfs/objects`.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::host::{ByteStream, HostError, HostResult, UploadOutcome};
use crate::lfs::{IntegrityError, LfsPointer, VerifyingReader};

pub struct LfsStore {
    root: PathBuf,
}

impl LfsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, pointer: &LfsPointer) -> PathBuf {
        let oid = pointer.oid.as_str();
        self.root.join(&oid[0..2]).join(&oid[2..4]).join(oid)
    }

    pub fn contains(&self, pointer: &LfsPointer) -> bool {
        fs::metadata(self.object_path(pointer))
            .map(|m| m.is_file() && m.len() == pointer.size)
            .unwrap_or(false)
    }

    /// Verify `body` against the pointer and persist it atomically.
    ///
    /// A partial or mismatching body leaves nothing behind.
    pub fn store(&self, pointer: &LfsPointer, body: ByteStream) -> HostResult<UploadOutcome> {
        if self.contains(pointer) {
            debug!(%pointer, "object already present");
            return Ok(UploadOutcome::AlreadyPresent);
        }
        let path = self.object_path(pointer);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut staged = NamedTempFile::new_in(&self.root)?;
        let mut verified = VerifyingReader::new(body, pointer.clone());
        io::copy(&mut verified, staged.as_file_mut()).map_err(transfer_error)?;
        staged.as_file().sync_all()?;
        staged.persist(&path).map_err(|e| HostError::Io(e.error))?;
        debug!(%pointer, path = %path.display(), "object stored");
        Ok(UploadOutcome::Stored)
    }

    pub fn open(&self, pointer: &LfsPointer) -> HostResult<ByteStream> {
        match File::open(self.object_path(pointer)) {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(HostError::NotFound(format!("lfs object {}", pointer.oid)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> HostResult<usize> {
        let mut count = 0;
        for level1 in read_dirs(&self.root)? {
            for level2 in read_dirs(&level1)? {
                for object in fs::read_dir(&level2)? {
                    if object?.file_type()?.is_file() {
                        count += 1;
                    }
                }
            }
        }
        Ok(count)
    }
}

fn read_dirs(path: &Path) -> HostResult<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

/// Classify a failed transfer: integrity, interruption or plain io.
fn transfer_error(err: io::Error) -> HostError {
    if let Some(integrity) = IntegrityError::from_io(&err) {
        return HostError::Integrity(integrity.to_string());
    }
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::TimedOut => HostError::Interrupted(err.to_string()),
        _ => HostError::Io(err),
    }
}
