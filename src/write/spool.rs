//! Local spooling of write content.
//!
//! The oid of an LFS object has to be known before anything is sent, and a
//! failed upload has to resend the same bytes. Content is therefore written
//! once to an anonymous temporary file, hashed on the way in, and replayed
//! from there.

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};

use crate::host::ByteStream;
use crate::lfs::{HashingWriter, LfsPointer};

/// Incrementally receives content for a write.
pub struct Spooler {
    writer: HashingWriter<BufWriter<File>>,
}

impl Spooler {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            writer: HashingWriter::new(BufWriter::new(tempfile::tempfile()?)),
        })
    }

    pub fn bytes_written(&self) -> u64 {
        self.writer.bytes_written()
    }

    pub fn finish(self) -> io::Result<SpooledContent> {
        let (buffered, pointer) = self.writer.finish();
        let file = buffered.into_inner().map_err(|e| e.into_error())?;
        Ok(SpooledContent { file, pointer })
    }
}

impl Write for Spooler {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Content fully spooled to disk, with its LFS pointer.
#[derive(Debug)]
pub struct SpooledContent {
    file: File,
    pointer: LfsPointer,
}

impl SpooledContent {
    pub fn from_reader<R: Read + ?Sized>(reader: &mut R) -> io::Result<Self> {
        let mut spooler = Spooler::new()?;
        io::copy(reader, &mut spooler)?;
        spooler.finish()
    }

    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        Self::from_reader(&mut &bytes[..])
    }

    pub fn pointer(&self) -> &LfsPointer {
        &self.pointer
    }

    pub fn size(&self) -> u64 {
        self.pointer.size
    }

    /// A fresh stream over the full content.
    ///
    /// Streams share one file cursor; only the most recent one may be read.
    pub fn open(&self) -> io::Result<ByteStream> {
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(0))?;
        Ok(Box::new(file))
    }
}
