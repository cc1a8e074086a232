//! Git LFS pointer format and content hashing.

mod attributes;
mod digest;
mod pointer;

pub use attributes::LfsAttributes;
pub use digest::{HashingWriter, IntegrityError, VerifyingReader};
pub use pointer::{LfsPointer, Oid, PointerError, MAX_POINTER_SIZE, SPEC_VERSION};

/// The `.gitattributes` line that routes `path` through the LFS filter.
pub fn gitattributes_line(path: &str) -> String {
    // spaces would split the pattern; git accepts the escaped form
    format!("{} filter=lfs diff=lfs merge=lfs -text", path.replace(' ', "[[:space:]]"))
}

/// Return `existing` with the LFS line for `path` appended, or `None` if it
/// is already tracked.
pub fn track_in_gitattributes(existing: &str, path: &str) -> Option<String> {
    let line = gitattributes_line(path);
    if existing.lines().any(|l| l.trim() == line) {
        return None;
    }
    let mut updated = existing.to_string();
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&line);
    updated.push('\n');
    Some(updated)
}
