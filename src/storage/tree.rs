//! Tree walking and editing for the local host.
//!
//! git trees are immutable and nested one level at a time, so writing
//! `a/b/c.txt` means rebuilding `a/b`, then `a`, then the root. The helpers
//! here hide that recursion.

use git2::{FileMode, ObjectType, Oid, Repository, Tree};

use crate::host::{HostError, HostResult, TreeEntry};
use crate::lfs::{LfsPointer, MAX_POINTER_SIZE};

/// Recursively list everything below `tree`, with paths prefixed by `prefix`.
pub fn walk(repo: &Repository, tree: &Tree<'_>, prefix: &str, out: &mut Vec<TreeEntry>) -> HostResult<()> {
    for entry in tree.iter() {
        let Some(name) = entry.name() else {
            continue;
        };
        let path = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        };
        match entry.kind() {
            Some(ObjectType::Tree) => {
                let subtree = repo.find_tree(entry.id())?;
                out.push(TreeEntry::tree(path.clone()));
                walk(repo, &subtree, &path, out)?;
            }
            Some(ObjectType::Blob) => {
                let blob = repo.find_blob(entry.id())?;
                out.push(TreeEntry::blob(path, is_pointer(blob.content())));
            }
            // submodules and the like are not files
            _ => {}
        }
    }
    Ok(())
}

fn is_pointer(content: &[u8]) -> bool {
    content.len() < MAX_POINTER_SIZE && LfsPointer::parse(content).is_ok()
}

/// What lives at a path inside a tree.
pub enum Located {
    Tree(Oid),
    Blob(Oid),
    Missing,
}

pub fn locate(tree: &Tree<'_>, path: &str) -> HostResult<Located> {
    if path.is_empty() {
        return Ok(Located::Tree(tree.id()));
    }
    let entry = match tree.get_path(std::path::Path::new(path)) {
        Ok(entry) => entry,
        Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(Located::Missing),
        Err(e) => return Err(e.into()),
    };
    Ok(match entry.kind() {
        Some(ObjectType::Tree) => Located::Tree(entry.id()),
        Some(ObjectType::Blob) => Located::Blob(entry.id()),
        _ => Located::Missing,
    })
}

/// Return a new root tree with `blob` stored at `path`, creating intermediate
/// trees as needed.
///
/// A file standing where a directory is needed is an `AlreadyExists` error.
pub fn insert_blob(repo: &Repository, root: Option<&Tree<'_>>, path: &str, blob: Oid) -> HostResult<Oid> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(HostError::InvalidResponse("empty file path".to_string()));
    }
    insert_at(repo, root, &segments, blob, path)
}

fn insert_at(
    repo: &Repository,
    base: Option<&Tree<'_>>,
    segments: &[&str],
    blob: Oid,
    full_path: &str,
) -> HostResult<Oid> {
    let Some((&name, rest)) = segments.split_first() else {
        return Err(HostError::InvalidResponse("empty file path".to_string()));
    };
    let mut builder = repo.treebuilder(base)?;

    if rest.is_empty() {
        if let Some(existing) = base.and_then(|t| t.get_name(name)) {
            if existing.kind() == Some(ObjectType::Tree) {
                return Err(HostError::AlreadyExists(format!("{} is a directory", full_path)));
            }
        }
        builder.insert(name, blob, FileMode::Blob.into())?;
        return Ok(builder.write()?);
    }

    let subtree = match base.and_then(|t| t.get_name(name)) {
        Some(entry) if entry.kind() == Some(ObjectType::Tree) => Some(repo.find_tree(entry.id())?),
        Some(_) => {
            return Err(HostError::AlreadyExists(format!(
                "a file is in the way of {}",
                full_path
            )))
        }
        None => None,
    };
    let child = insert_at(repo, subtree.as_ref(), rest, blob, full_path)?;
    builder.insert(name, child, FileMode::Tree.into())?;
    Ok(builder.write()?)
}
