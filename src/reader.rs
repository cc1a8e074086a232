//! Blob reading with transparent LFS resolution.

use std::fmt;
use std::io::{self, Cursor, Read};
use std::sync::Arc;

use tracing::debug;

use crate::error::{FsError, FsResult};
use crate::host::{ByteStream, RepositoryHost};
use crate::lfs::{LfsPointer, VerifyingReader, MAX_POINTER_SIZE};
use crate::resolver::RepositoryCoordinate;

/// A lazily consumed file body.
///
/// For LFS files the stream yields exactly the size the pointer declares and
/// fails with `InvalidData` if the object does not match it.
pub struct BlobStream {
    inner: Box<dyn Read + Send>,
    pointer: Option<LfsPointer>,
}

impl BlobStream {
    /// The pointer this content was resolved through, if any.
    pub fn lfs_pointer(&self) -> Option<&LfsPointer> {
        self.pointer.as_ref()
    }

    pub fn is_lfs(&self) -> bool {
        self.pointer.is_some()
    }
}

impl Read for BlobStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl fmt::Debug for BlobStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStream")
            .field("pointer", &self.pointer)
            .finish_non_exhaustive()
    }
}

/// Opens file content, following LFS pointers to their objects.
#[derive(Clone)]
pub struct BlobReader {
    host: Arc<dyn RepositoryHost>,
}

impl BlobReader {
    pub fn new(host: Arc<dyn RepositoryHost>) -> Self {
        Self { host }
    }

    pub fn open_read(&self, coordinate: &RepositoryCoordinate) -> FsResult<BlobStream> {
        let location = coordinate.to_string();
        let repo = &coordinate.repository_id;
        let mut raw = self
            .host
            .read_blob(repo, &coordinate.reference, &coordinate.path())
            .map_err(|e| FsError::from_host(e, &location))?;

        let head = peek(&mut raw, MAX_POINTER_SIZE).map_err(|e| FsError::from_read(e, &location))?;
        if let Some(pointer) = as_pointer(&head) {
            debug!(path = %location, %pointer, "resolving lfs object");
            let object = self
                .host
                .download_lfs_object(repo, &pointer)
                .map_err(|e| FsError::from_host(e, &location))?;
            return Ok(BlobStream {
                inner: Box::new(VerifyingReader::new(object, pointer.clone())),
                pointer: Some(pointer),
            });
        }

        Ok(BlobStream {
            inner: Box::new(Cursor::new(head).chain(raw)),
            pointer: None,
        })
    }
}

/// Read up to `limit` bytes, stopping early only at end of stream.
fn peek(stream: &mut ByteStream, limit: usize) -> io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(limit.min(256));
    stream.by_ref().take(limit as u64).read_to_end(&mut head)?;
    Ok(head)
}

/// Interpret the first bytes of a blob as a pointer.
///
/// A full peek buffer means the blob is larger than any pointer.
fn as_pointer(head: &[u8]) -> Option<LfsPointer> {
    if head.len() >= MAX_POINTER_SIZE || !LfsPointer::looks_like_pointer(head) {
        return None;
    }
    match LfsPointer::parse(head) {
        Ok(pointer) => Some(pointer),
        Err(err) => {
            debug!(%err, "pointer-like blob did not parse, serving raw bytes");
            None
        }
    }
}
