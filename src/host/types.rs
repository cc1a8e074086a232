//! core value types exchanged with a repository host.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Host-specific repository identifier.
///
/// For GitLab this is the numeric project id, for the local host it is the
/// `namespace/name` path. The core never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryId(String);

impl RepositoryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// what the credential may do with a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Read,
    Write,
}

impl AccessLevel {
    pub fn can_write(&self) -> bool {
        matches!(self, AccessLevel::Write)
    }
}

/// A repository visible to the caller's credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub id: RepositoryId,
    /// human-facing namespace, e.g. `alice.smith` or `lab/plants`
    pub namespace: String,
    pub name: String,
    pub default_branch: BranchName,
    pub access: AccessLevel,
}

impl RepositoryInfo {
    /// The top-level directory name this repository appears under.
    pub fn directory_name(&self) -> String {
        crate::resolver::directory_name(&self.namespace, &self.name)
    }
}

/// kind of an entry in a repository tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Blob,
    Tree,
}

/// One entry of a host tree listing.
///
/// `path` is relative to the repository root and uses `/` as separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub kind: EntryKind,
    pub path: String,
    /// Local hosts inspect the blob; HTTP hosts go by `.gitattributes`.
    pub is_lfs_pointer: bool,
}

impl TreeEntry {
    pub fn blob(path: impl Into<String>, is_lfs_pointer: bool) -> Self {
        let path = path.into();
        Self {
            name: last_segment(&path).to_string(),
            kind: EntryKind::Blob,
            path,
            is_lfs_pointer,
        }
    }

    pub fn tree(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: last_segment(&path).to_string(),
            kind: EntryKind::Tree,
            path,
            is_lfs_pointer: false,
        }
    }

    pub fn is_tree(&self) -> bool {
        self.kind == EntryKind::Tree
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Opaque continuation token for paginated listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageToken(String);

impl PageToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// one page of a paginated listing
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<PageToken>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

/// a branch name, with special handling for upload branches
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// prefix for branches created by write transactions
    pub const UPLOAD_PREFIX: &'static str = "upload/";

    /// create a new BranchName
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        // git allows more, but these are the shapes that break ref paths
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if name.contains("..")
            || name.ends_with('/')
            || name.starts_with('/')
            || name.ends_with(".lock")
        {
            return Err(InvalidNameError::InvalidPath(name));
        }
        for (i, c) in name.chars().enumerate() {
            if c.is_control() || matches!(c, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\') {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }
        Ok(Self(name))
    }

    /// generate a fresh upload branch name (`upload/<ulid>`)
    pub fn generate_upload() -> Self {
        Self(format!(
            "{}{}",
            Self::UPLOAD_PREFIX,
            ulid::Ulid::new().to_string().to_lowercase()
        ))
    }

    /// check if this branch was created by a write transaction
    pub fn is_upload_branch(&self) -> bool {
        self.0.starts_with(Self::UPLOAD_PREFIX)
    }

    /// get the full ref path (e.g., "refs/heads/main")
    pub fn as_ref_path(&self) -> String {
        format!("refs/heads/{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for BranchName {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BranchName> for String {
    fn from(value: BranchName) -> Self {
        value.0
    }
}

/// error type for invalid branch names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    InvalidCharacter { char: char, position: usize },
    InvalidPath(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character '{}' at position {}", char, position)
            }
            Self::InvalidPath(path) => write!(f, "invalid path: '{}'", path),
        }
    }
}

impl std::error::Error for InvalidNameError {}

/// whether a commit action creates or replaces a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Create,
    Update,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Create => write!(f, "create"),
            ActionKind::Update => write!(f, "update"),
        }
    }
}

/// One file change inside a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAction {
    pub kind: ActionKind,
    pub path: String,
    pub content: Vec<u8>,
}

impl CommitAction {
    pub fn create(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: ActionKind::Create,
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn update(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: ActionKind::Update,
            path: path.into(),
            content: content.into(),
        }
    }
}

/// what to open a merge request for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequestSpec {
    pub source: BranchName,
    pub target: BranchName,
    pub title: String,
    pub description: String,
}

/// A merge request as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub id: u64,
    pub source: BranchName,
    pub target: BranchName,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// result of an LFS upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// bytes were transferred and stored
    Stored,
    /// the host already had an object with this oid
    AlreadyPresent,
}
