//! Directory synthesis over host tree listings.
//!
//! Hosts only report the entries that exist in git. Directories that hold
//! nothing but deeper files still have to show up, so listings are derived
//! from path prefixes: every file path implies all of its ancestors.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{FsError, FsResult};
use crate::host::{EntryKind, RepositoryHost, TreeEntry};
use crate::resolver::RepositoryCoordinate;

/// Kind of directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirEntryKind {
    File,
    Directory,
}

/// One entry of a synthesized directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// name of the entry (not the full path)
    pub name: String,
    pub kind: DirEntryKind,
    /// The stored blob is an LFS pointer. Hosts that cannot see blob contents
    /// in a listing derive this from the `.gitattributes` at the listed ref.
    pub is_lfs_pointer: bool,
}

impl DirEntry {
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DirEntryKind::Directory,
            is_lfs_pointer: false,
        }
    }

    pub fn file(name: impl Into<String>, is_lfs_pointer: bool) -> Self {
        Self {
            name: name.into(),
            kind: DirEntryKind::File,
            is_lfs_pointer,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == DirEntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == DirEntryKind::File
    }
}

/// Derives directory structure from a host's recursive tree listings.
#[derive(Clone)]
pub struct DirectorySynthesizer {
    host: Arc<dyn RepositoryHost>,
}

impl DirectorySynthesizer {
    pub fn new(host: Arc<dyn RepositoryHost>) -> Self {
        Self { host }
    }

    fn tree(&self, coordinate: &RepositoryCoordinate, path: &str) -> FsResult<Vec<TreeEntry>> {
        let entries = self
            .host
            .list_tree(&coordinate.repository_id, &coordinate.reference, path)
            .map_err(|e| FsError::from_host(e, &coordinate.to_string()))?;
        debug!(repo = %coordinate.repository_id, path, entries = entries.len(), "tree listing");
        Ok(entries)
    }

    /// Immediate children of the coordinate, sorted by name.
    ///
    /// A path with nothing below it lists as empty.
    pub fn list_children(&self, coordinate: &RepositoryCoordinate) -> FsResult<Vec<DirEntry>> {
        let prefix = coordinate.path();
        let entries = self.tree(coordinate, &prefix)?;
        Ok(immediate_children(&prefix, &entries))
    }

    /// Classify the coordinate; `None` when nothing exists there.
    pub fn stat(&self, coordinate: &RepositoryCoordinate) -> FsResult<Option<DirEntry>> {
        let Some(name) = coordinate.file_name() else {
            // repository root
            return Ok(Some(DirEntry::directory(coordinate.directory_name())));
        };
        let target = coordinate.path();
        let parent = &coordinate.inner_path[..coordinate.inner_path.len() - 1];
        let entries = self.tree(coordinate, &parent.join("/"))?;
        Ok(classify(&target, name, &entries))
    }

    pub fn is_dir(&self, coordinate: &RepositoryCoordinate) -> FsResult<bool> {
        Ok(self.stat(coordinate)?.is_some_and(|e| e.is_dir()))
    }
}

fn relative_to<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(path);
    }
    path.strip_prefix(prefix)?.strip_prefix('/')
}

/// Collapse a recursive listing into the entries directly below `prefix`.
fn immediate_children(prefix: &str, entries: &[TreeEntry]) -> Vec<DirEntry> {
    let mut children: BTreeMap<&str, DirEntry> = BTreeMap::new();
    for entry in entries {
        let Some(relative) = relative_to(prefix, &entry.path) else {
            continue;
        };
        if relative.is_empty() {
            continue;
        }
        match relative.split_once('/') {
            Some((dir, _)) => {
                children.insert(dir, DirEntry::directory(dir));
            }
            None => {
                let child = match entry.kind {
                    EntryKind::Tree => DirEntry::directory(relative),
                    EntryKind::Blob => DirEntry::file(relative, entry.is_lfs_pointer),
                };
                // a synthesized directory must not be downgraded by a later entry
                children.entry(relative).or_insert(child);
            }
        }
    }
    children.into_values().collect()
}

fn classify(target: &str, name: &str, entries: &[TreeEntry]) -> Option<DirEntry> {
    let mut found = None;
    for entry in entries {
        if entry.path == target {
            match entry.kind {
                EntryKind::Tree => return Some(DirEntry::directory(name)),
                EntryKind::Blob => found = Some(DirEntry::file(name, entry.is_lfs_pointer)),
            }
        } else if relative_to(target, &entry.path).is_some() {
            return Some(DirEntry::directory(name));
        }
    }
    found
}
