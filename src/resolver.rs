//! Virtual path resolution.
//!
//! The first path segment names a repository as `<namespace>-<name>`, where
//! the namespace is encoded for use as a single path segment:
//!
//! | namespace     | name   | directory             |
//! |---------------|--------|-----------------------|
//! | `alice.smith` | `myarc`| `alice_smith-myarc`   |
//! | `lab/plants`  | `arc1` | `lab-plants-arc1`     |
//!
//! Because `-` also appears inside namespaces and names, the split point is
//! taken from the repository catalog rather than from the text alone. An
//! optional `@<ref>` suffix on the first segment selects a ref other than the
//! default branch; `/` inside the ref is written as `~`, which git forbids in
//! ref names (`bob-data@upload~01h...`). Everything after the first segment is
//! the in-repository path.
//!
//! Resolution never talks to the host; it is a pure function of the path and
//! the catalog snapshot it is given.

use std::fmt;

use crate::config::AmbiguityPolicy;
use crate::error::{FsError, FsResult};
use crate::host::{BranchName, RepositoryId, RepositoryInfo};
use crate::index::Catalog;

const SEPARATOR: char = '-';
const REF_MARKER: char = '@';
const REF_SLASH: char = '~';

/// Encode a ref for use after `@` in the first path segment.
pub fn encode_ref(reference: &str) -> String {
    reference.replace('/', &REF_SLASH.to_string())
}

/// Encode a human-facing namespace as a single path segment.
pub fn encode_namespace(namespace: &str) -> String {
    namespace.replace('.', "_").replace('/', "-")
}

/// Directory name a repository appears under at the filesystem root.
pub fn directory_name(namespace: &str, name: &str) -> String {
    format!("{}{}{}", encode_namespace(namespace), SEPARATOR, name)
}

/// A path that resolved to something inside a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryCoordinate {
    pub namespace: String,
    pub repository_name: String,
    pub repository_id: RepositoryId,
    pub default_branch: BranchName,
    /// ref to read from; the default branch unless overridden with `@ref`
    pub reference: String,
    pub inner_path: Vec<String>,
}

impl RepositoryCoordinate {
    fn new(repo: &RepositoryInfo, reference: Option<String>, inner_path: Vec<String>) -> Self {
        Self {
            namespace: repo.namespace.clone(),
            repository_name: repo.name.clone(),
            repository_id: repo.id.clone(),
            default_branch: repo.default_branch.clone(),
            reference: reference.unwrap_or_else(|| repo.default_branch.to_string()),
            inner_path,
        }
    }

    /// In-repository path joined with `/`; empty at the repository root.
    pub fn path(&self) -> String {
        self.inner_path.join("/")
    }

    pub fn is_repository_root(&self) -> bool {
        self.inner_path.is_empty()
    }

    pub fn has_ref_override(&self) -> bool {
        self.reference != self.default_branch.as_str()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.inner_path.last().map(String::as_str)
    }

    pub fn directory_name(&self) -> String {
        directory_name(&self.namespace, &self.repository_name)
    }
}

impl fmt::Display for RepositoryCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.directory_name())?;
        if self.has_ref_override() {
            write!(f, "{}{}", REF_MARKER, encode_ref(&self.reference))?;
        }
        for segment in &self.inner_path {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

/// Outcome of resolving a virtual path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Root,
    Repository(RepositoryCoordinate),
}

/// Split a virtual path into segments, dropping empty and `.` segments.
pub fn split_path(path: &str) -> FsResult<Vec<String>> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(FsError::invalid_path(path, "'..' segments are not allowed")),
            s => segments.push(s.to_string()),
        }
    }
    Ok(segments)
}

/// Resolve `path` against a catalog snapshot.
///
/// Unknown but well-formed repository directories are `NotFound`.
pub fn resolve(path: &str, catalog: &Catalog, policy: AmbiguityPolicy) -> FsResult<Resolved> {
    let mut segments = split_path(path)?;
    if segments.is_empty() {
        return Ok(Resolved::Root);
    }
    let inner_path = segments.split_off(1);
    let first = segments.remove(0);

    let (directory, reference) = match first.split_once(REF_MARKER) {
        Some((_, "")) => return Err(FsError::invalid_path(path, "empty ref after '@'")),
        Some((dir, reference)) => (dir, Some(reference.replace(REF_SLASH, "/"))),
        None => (first.as_str(), None),
    };
    check_directory_syntax(path, directory)?;

    let candidates = catalog.lookup(directory);
    let repo = match candidates.as_slice() {
        [] => return Err(FsError::NotFound(directory.to_string())),
        [only] => *only,
        many => pick_candidate(path, many, policy)?,
    };
    Ok(Resolved::Repository(RepositoryCoordinate::new(repo, reference, inner_path)))
}

fn check_directory_syntax(path: &str, directory: &str) -> FsResult<()> {
    match directory.rsplit_once(SEPARATOR) {
        None => Err(FsError::invalid_path(path, "expected <namespace>-<repository>")),
        Some((_, "")) => Err(FsError::invalid_path(path, "missing repository name")),
        Some((namespace, _)) if namespace.trim_matches(SEPARATOR).is_empty() => {
            Err(FsError::invalid_path(path, "empty namespace"))
        }
        Some(_) => Ok(()),
    }
}

fn pick_candidate<'a>(
    path: &str,
    candidates: &[&'a RepositoryInfo],
    policy: AmbiguityPolicy,
) -> FsResult<&'a RepositoryInfo> {
    let ambiguous = || {
        let names: Vec<String> = candidates
            .iter()
            .map(|r| format!("{}/{}", r.namespace, r.name))
            .collect();
        FsError::invalid_path(path, format!("ambiguous repository: {}", names.join(", ")))
    };
    if policy == AmbiguityPolicy::FailClosed {
        return Err(ambiguous());
    }

    // rightmost split == longest encoded namespace
    let mut ranked: Vec<&RepositoryInfo> = candidates.to_vec();
    ranked.sort_by_key(|r| std::cmp::Reverse(encode_namespace(&r.namespace).len()));
    let best = encode_namespace(&ranked[0].namespace).len();
    let runner_up = encode_namespace(&ranked[1].namespace).len();
    if best == runner_up {
        return Err(ambiguous());
    }
    Ok(ranked[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::host::AccessLevel;

    fn repo(namespace: &str, name: &str) -> RepositoryInfo {
        RepositoryInfo {
            id: RepositoryId::new(format!("{}/{}", namespace, name)),
            namespace: namespace.to_string(),
            name: name.to_string(),
            default_branch: BranchName::new("main").unwrap(),
            access: AccessLevel::Write,
        }
    }

    fn catalog() -> Catalog {
        Catalog::new(vec![
            repo("alice.smith", "myarc"),
            repo("lab/plants", "arc-1"),
            repo("bob", "data"),
        ])
    }

    fn coordinate(path: &str) -> RepositoryCoordinate {
        match resolve(path, &catalog(), AmbiguityPolicy::FailClosed).unwrap() {
            Resolved::Repository(c) => c,
            Resolved::Root => panic!("expected a repository coordinate for {}", path),
        }
    }

    #[test]
    fn test_directory_name_encoding() {
        assert_eq!(directory_name("alice.smith", "myarc"), "alice_smith-myarc");
        assert_eq!(directory_name("lab/plants", "arc-1"), "lab-plants-arc-1");
    }

    #[test]
    fn test_root_aliases() {
        for path in ["", ".", "./", "/", "//"] {
            assert_eq!(
                resolve(path, &catalog(), AmbiguityPolicy::FailClosed).unwrap(),
                Resolved::Root,
                "path {:?}",
                path
            );
        }
    }

    #[test]
    fn test_repository_root() {
        let c = coordinate("alice_smith-myarc");
        assert_eq!(c.namespace, "alice.smith");
        assert_eq!(c.repository_name, "myarc");
        assert_eq!(c.reference, "main");
        assert!(c.is_repository_root());
        assert!(!c.has_ref_override());
    }

    #[test]
    fn test_inner_path() {
        let c = coordinate("/alice_smith-myarc/./data//readme.txt");
        assert_eq!(c.inner_path, vec!["data", "readme.txt"]);
        assert_eq!(c.path(), "data/readme.txt");
        assert_eq!(c.file_name(), Some("readme.txt"));
        assert_eq!(c.to_string(), "alice_smith-myarc/data/readme.txt");
    }

    #[test]
    fn test_dash_in_namespace_and_name() {
        let c = coordinate("lab-plants-arc-1/x");
        assert_eq!(c.namespace, "lab/plants");
        assert_eq!(c.repository_name, "arc-1");
    }

    #[test]
    fn test_ref_override() {
        let c = coordinate("bob-data@upload~01h/file.txt");
        assert_eq!(c.reference, "upload/01h");
        assert_eq!(c.inner_path, vec!["file.txt"]);
        assert!(c.has_ref_override());
        assert_eq!(c.to_string(), "bob-data@upload~01h/file.txt");

        let c = coordinate("bob-data@dev/file.txt");
        assert_eq!(c.reference, "dev");

        let err = resolve("bob-data@", &catalog(), AmbiguityPolicy::FailClosed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPath);
    }

    #[test]
    fn test_malformed_paths() {
        for path in ["nodash", "-myarc", "alice_smith-", "alice_smith-myarc/../x", ".."] {
            let err = resolve(path, &catalog(), AmbiguityPolicy::FailClosed).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidPath, "path {:?}", path);
        }
    }

    #[test]
    fn test_unknown_repository() {
        let err = resolve("carol-unknown/a", &catalog(), AmbiguityPolicy::FailClosed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_ambiguity_policy() {
        // "a-b" + "c" and "a" + "b-c" both appear as "a-b-c"
        let catalog = Catalog::new(vec![repo("a/b", "c"), repo("a", "b-c")]);

        let err = resolve("a-b-c", &catalog, AmbiguityPolicy::FailClosed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPath);

        match resolve("a-b-c/f", &catalog, AmbiguityPolicy::PreferRightmost).unwrap() {
            Resolved::Repository(c) => {
                assert_eq!(c.namespace, "a/b");
                assert_eq!(c.repository_name, "c");
            }
            Resolved::Root => panic!("expected repository"),
        }
    }

    #[test]
    fn test_indistinguishable_namespaces_stay_ambiguous() {
        let catalog = Catalog::new(vec![repo("a.b", "c"), repo("a_b", "c")]);
        let err = resolve("a_b-c", &catalog, AmbiguityPolicy::PreferRightmost).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPath);
    }

    #[test]
    fn test_resolve_is_pure() {
        let catalog = catalog();
        let a = resolve("alice_smith-myarc/data", &catalog, AmbiguityPolicy::FailClosed).unwrap();
        let b = resolve("alice_smith-myarc/data", &catalog, AmbiguityPolicy::FailClosed).unwrap();
        assert_eq!(a, b);
    }
}
