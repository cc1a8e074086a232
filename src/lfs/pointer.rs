//! LFS pointer files.
//!
//! A pointer stands in for large content stored outside of git. Its text form
//! is fixed by the git-lfs spec and must be reproduced byte for byte:
//!
//! ```text
//! version https://git-lfs.github.com/spec/v1
//! oid sha256:4d7a214614ab2935c943f9e0ff69d22eadbb8f32b1258daaa5e2ca24d17e2393
//! size 12345
//! ```

use std::fmt;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Pointer spec version written by this crate.
pub const SPEC_VERSION: &str = "https://git-lfs.github.com/spec/v1";

/// Pre-release spec URL still found in old repositories.
const LEGACY_SPEC_VERSION: &str = "https://hawser.github.com/spec/v1";

/// Pointer files are never larger than this.
pub const MAX_POINTER_SIZE: usize = 1024;

const HASH_ALGORITHM: &str = "sha256";

/// A validated sha256 object id (64 lowercase hex digits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(String);

impl Oid {
    pub fn from_hex(hex: &str) -> Result<Self, PointerError> {
        if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(PointerError::InvalidOid(hex.to_string()));
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// oid of the given bytes
    pub fn of(content: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(content)))
    }

    pub(crate) fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// reasons a blob is not a valid pointer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PointerError {
    #[error("pointer too large: {0} bytes")]
    TooLarge(usize),
    #[error("pointer is not valid utf-8")]
    NotText,
    #[error("missing or unknown version line")]
    Version,
    #[error("malformed line: {0:?}")]
    MalformedLine(String),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("unsupported hash algorithm: {0}")]
    UnsupportedHash(String),
    #[error("invalid oid: {0}")]
    InvalidOid(String),
    #[error("invalid size: {0}")]
    InvalidSize(String),
}

/// A parsed LFS pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LfsPointer {
    pub oid: Oid,
    pub size: u64,
    /// the spec URL from the version line
    pub version: String,
}

impl LfsPointer {
    pub fn new(oid: Oid, size: u64) -> Self {
        Self {
            oid,
            size,
            version: SPEC_VERSION.to_string(),
        }
    }

    /// pointer for in-memory content
    pub fn from_content(content: &[u8]) -> Self {
        Self::new(Oid::of(content), content.len() as u64)
    }

    /// Parse pointer text. Extension lines (`ext-*`) are accepted and ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self, PointerError> {
        if bytes.len() > MAX_POINTER_SIZE {
            return Err(PointerError::TooLarge(bytes.len()));
        }
        let text = std::str::from_utf8(bytes).map_err(|_| PointerError::NotText)?;
        let mut lines = text.lines();

        let version = match lines.next().and_then(|l| l.strip_prefix("version ")) {
            Some(v) if v == SPEC_VERSION || v == LEGACY_SPEC_VERSION => v.to_string(),
            _ => return Err(PointerError::Version),
        };

        let mut oid = None;
        let mut size = None;
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once(' ')
                .ok_or_else(|| PointerError::MalformedLine(line.to_string()))?;
            match key {
                "oid" => {
                    let (algorithm, hex) = value
                        .split_once(':')
                        .ok_or_else(|| PointerError::MalformedLine(line.to_string()))?;
                    if algorithm != HASH_ALGORITHM {
                        return Err(PointerError::UnsupportedHash(algorithm.to_string()));
                    }
                    oid = Some(Oid::from_hex(hex)?);
                }
                "size" => {
                    size = Some(
                        value
                            .parse::<u64>()
                            .map_err(|_| PointerError::InvalidSize(value.to_string()))?,
                    );
                }
                k if k.starts_with("ext-") => {}
                _ => return Err(PointerError::MalformedLine(line.to_string())),
            }
        }

        Ok(Self {
            oid: oid.ok_or(PointerError::MissingField("oid"))?,
            size: size.ok_or(PointerError::MissingField("size"))?,
            version,
        })
    }

    /// cheap check used before a full parse
    pub fn looks_like_pointer(prefix: &[u8]) -> bool {
        prefix.starts_with(b"version https://git-lfs.github.com/spec/")
            || prefix.starts_with(b"version https://hawser.github.com/spec/")
    }

    /// The canonical pointer file text.
    pub fn to_text(&self) -> String {
        format!(
            "version {}\noid {}:{}\nsize {}\n",
            self.version, HASH_ALGORITHM, self.oid, self.size
        )
    }
}

impl fmt::Display for LfsPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({} bytes)", HASH_ALGORITHM, self.oid, self.size)
    }
}
