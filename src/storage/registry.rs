//! Repository and merge request metadata of the local host, kept in
//! `registry.json`.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::host::{HostError, HostResult, MergeRequest, RepositoryId, RepositoryInfo};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub repositories: Vec<RepositoryInfo>,
    #[serde(default)]
    pub merge_requests: Vec<StoredMergeRequest>,
}

/// A merge request together with the repository it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMergeRequest {
    pub repository: RepositoryId,
    #[serde(flatten)]
    pub merge_request: MergeRequest,
}

impl Registry {
    pub fn load(path: &Path) -> HostResult<Self> {
        let bytes = fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => HostError::NotFound(format!("registry {}", path.display())),
            _ => HostError::Io(e),
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write atomically next to `path`.
    pub fn save(&self, path: &Path) -> HostResult<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut staged = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut staged, self)?;
        staged.write_all(b"\n")?;
        staged.persist(path).map_err(|e| HostError::Io(e.error))?;
        Ok(())
    }

    pub fn repository(&self, id: &RepositoryId) -> HostResult<&RepositoryInfo> {
        self.repositories
            .iter()
            .find(|r| &r.id == id)
            .ok_or_else(|| HostError::NotFound(format!("repository {}", id)))
    }

    pub fn repository_mut(&mut self, id: &RepositoryId) -> HostResult<&mut RepositoryInfo> {
        self.repositories
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| HostError::NotFound(format!("repository {}", id)))
    }

    pub fn next_merge_request_id(&self) -> u64 {
        self.merge_requests
            .iter()
            .map(|mr| mr.merge_request.id)
            .max()
            .unwrap_or(0)
            + 1
    }

    pub fn merge_requests_for(&self, id: &RepositoryId) -> Vec<MergeRequest> {
        self.merge_requests
            .iter()
            .filter(|mr| &mr.repository == id)
            .map(|mr| mr.merge_request.clone())
            .collect()
    }
}
