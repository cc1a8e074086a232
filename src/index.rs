//! Repository index: the set of repositories visible to the credential.
//!
//! The index walks the host's paginated repository listing and keeps the
//! result as an immutable [`Catalog`] snapshot. Snapshots are shared as
//! `Arc`s and replaced wholesale on refresh, so readers never see a
//! half-built catalog.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use crate::host::{HostResult, RepositoryHost, RepositoryInfo};

/// Immutable snapshot of the accessible repositories.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    repositories: Vec<RepositoryInfo>,
    /// directory name -> indices into `repositories`
    by_directory: BTreeMap<String, Vec<usize>>,
}

impl Catalog {
    pub fn new(repositories: Vec<RepositoryInfo>) -> Self {
        let mut by_directory: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, repo) in repositories.iter().enumerate() {
            by_directory.entry(repo.directory_name()).or_default().push(i);
        }
        Self {
            repositories,
            by_directory,
        }
    }

    /// Root directory names, sorted and deduplicated.
    pub fn directory_names(&self) -> Vec<String> {
        self.by_directory.keys().cloned().collect()
    }

    /// All repositories whose directory name is `directory`.
    ///
    /// More than one result means the name is ambiguous.
    pub fn lookup(&self, directory: &str) -> Vec<&RepositoryInfo> {
        self.by_directory
            .get(directory)
            .map(|indices| indices.iter().map(|&i| &self.repositories[i]).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }
}

struct CachedCatalog {
    catalog: Arc<Catalog>,
    fetched_at: Instant,
}

/// Caching front for the host's repository listing.
pub struct RepositoryIndex {
    host: Arc<dyn RepositoryHost>,
    ttl: Duration,
    cache: RwLock<Option<CachedCatalog>>,
}

impl RepositoryIndex {
    pub fn new(host: Arc<dyn RepositoryHost>, ttl: Duration) -> Self {
        Self {
            host,
            ttl,
            cache: RwLock::new(None),
        }
    }

    /// Walk every page of the host listing. Zero repositories is a valid result.
    pub fn list_accessible_repositories(&self) -> HostResult<Vec<RepositoryInfo>> {
        let mut repositories = Vec::new();
        let mut token = None;
        let mut pages = 0usize;
        loop {
            let page = self.host.list_repositories(token.as_ref())?;
            pages += 1;
            repositories.extend(page.items);
            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        debug!(pages, repositories = repositories.len(), "listed repositories");
        Ok(repositories)
    }

    /// The current catalog, fetched from the host when the cached one is stale.
    pub fn snapshot(&self) -> HostResult<Arc<Catalog>> {
        {
            let cache = self.cache.read();
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(Arc::clone(&cached.catalog));
                }
            }
        }
        self.refresh()
    }

    /// Fetch a fresh catalog unconditionally.
    pub fn refresh(&self) -> HostResult<Arc<Catalog>> {
        let catalog = Arc::new(Catalog::new(self.list_accessible_repositories()?));
        *self.cache.write() = Some(CachedCatalog {
            catalog: Arc::clone(&catalog),
            fetched_at: Instant::now(),
        });
        Ok(catalog)
    }

    /// Drop the cached catalog; the next snapshot refetches.
    pub fn invalidate(&self) {
        *self.cache.write() = None;
    }
}
