//! streaming hashing helpers for LFS content.

use std::io::{self, Read, Write};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::lfs::pointer::{LfsPointer, Oid};

/// Writer adapter that computes the LFS pointer of everything written through it.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    size: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.size
    }

    /// Consume the adapter, returning the inner writer and the content pointer.
    pub fn finish(self) -> (W, LfsPointer) {
        let oid = Oid::from_digest(&self.hasher.finalize());
        (self.inner, LfsPointer::new(oid, self.size))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Content did not match the pointer that announced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("object {oid} is corrupt: {reason}")]
pub struct IntegrityError {
    pub oid: Oid,
    pub reason: String,
}

impl IntegrityError {
    /// recover an integrity failure from an io error produced by [`VerifyingReader`]
    pub fn from_io(err: &io::Error) -> Option<&IntegrityError> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<IntegrityError>())
    }
}

/// Reader adapter that yields at most `pointer.size` bytes and checks the
/// sha256 once the inner stream ends.
///
/// Mismatches surface as `io::ErrorKind::InvalidData` wrapping an
/// [`IntegrityError`].
pub struct VerifyingReader<R> {
    inner: R,
    expected: LfsPointer,
    hasher: Sha256,
    seen: u64,
    done: bool,
}

impl<R: Read> VerifyingReader<R> {
    pub fn new(inner: R, expected: LfsPointer) -> Self {
        Self {
            inner,
            expected,
            hasher: Sha256::new(),
            seen: 0,
            done: false,
        }
    }

    fn corrupt(&self, reason: String) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            IntegrityError {
                oid: self.expected.oid.clone(),
                reason,
            },
        )
    }

    fn verify_end(&mut self) -> io::Result<()> {
        self.done = true;
        if self.seen != self.expected.size {
            return Err(self.corrupt(format!(
                "expected {} bytes, got {}",
                self.expected.size, self.seen
            )));
        }
        let actual = Oid::from_digest(&std::mem::take(&mut self.hasher).finalize());
        if actual != self.expected.oid {
            return Err(self.corrupt(format!("content hashes to {}", actual)));
        }
        Ok(())
    }
}

impl<R: Read> Read for VerifyingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        if n == 0 {
            self.verify_end()?;
            return Ok(0);
        }
        self.seen += n as u64;
        if self.seen > self.expected.size {
            self.done = true;
            return Err(self.corrupt(format!(
                "more than the declared {} bytes",
                self.expected.size
            )));
        }
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}
