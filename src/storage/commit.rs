//! Commit creation.

use git2::{Oid, Repository};

use crate::host::{HostError, HostResult};

/// Author and committer of local commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSignature {
    pub name: String,
    pub email: String,
}

impl GitSignature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// default signature for local host commits
    pub fn arcfs() -> Self {
        Self::new("arcfs", "arcfs@localhost")
    }

    pub(crate) fn to_git2_signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

impl Default for GitSignature {
    fn default() -> Self {
        Self::arcfs()
    }
}

/// builder for creating commits with a fluent interface
pub struct CommitBuilder<'a> {
    repo: &'a Repository,
    tree_id: Option<Oid>,
    parents: Vec<Oid>,
    message: String,
    signature: GitSignature,
    update_ref: Option<String>,
}

impl<'a> CommitBuilder<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self {
            repo,
            tree_id: None,
            parents: Vec::new(),
            message: String::new(),
            signature: GitSignature::arcfs(),
            update_ref: None,
        }
    }

    pub fn tree(mut self, tree_id: Oid) -> Self {
        self.tree_id = Some(tree_id);
        self
    }

    pub fn parent(mut self, parent: Oid) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn signature(mut self, signature: GitSignature) -> Self {
        self.signature = signature;
        self
    }

    /// update a ref (branch) to point to this commit
    pub fn update_ref(mut self, refname: impl Into<String>) -> Self {
        self.update_ref = Some(refname.into());
        self
    }

    /// create the commit and return its ID
    pub fn commit(self) -> HostResult<Oid> {
        let tree_id = self
            .tree_id
            .ok_or_else(|| HostError::InvalidResponse("commit requires a tree".to_string()))?;

        let tree = self.repo.find_tree(tree_id)?;
        let sig = self.signature.to_git2_signature()?;
        let parent_commits: Vec<git2::Commit<'_>> = self
            .parents
            .iter()
            .map(|id| self.repo.find_commit(*id))
            .collect::<Result<_, _>>()?;
        let parent_refs: Vec<&git2::Commit<'_>> = parent_commits.iter().collect();

        let oid = self.repo.commit(
            self.update_ref.as_deref(),
            &sig,
            &sig,
            &self.message,
            &tree,
            &parent_refs,
        )?;
        Ok(oid)
    }
}

/// Create the root commit of a new repository (empty tree, no ref update).
pub fn create_initial_commit(repo: &Repository, signature: &GitSignature) -> HostResult<Oid> {
    let tree_id = repo.treebuilder(None)?.write()?;
    CommitBuilder::new(repo)
        .tree(tree_id)
        .message("[arcfs] Initialize repository")
        .signature(signature.clone())
        .commit()
}
