//! arcfs - a filesystem view over git-hosted, LFS-backed repositories.
//!
//! Every repository the credential can see appears as a top-level directory
//! named `<namespace>-<repository>`. Files are read through git, following
//! LFS pointers to their objects. Writes never touch a branch directly: each
//! file becomes an LFS upload, a pointer commit on a fresh branch and a merge
//! request back into the branch it was read from.
//!
//! # Example
//!
//! ```no_run
//! use std::io::Read;
//!
//! use arcfs::{ArcFs, ArcFsConfig, HostConfig};
//!
//! let host: HostConfig = "arcfs://glpat-xxxx@git.example.org".parse().unwrap();
//! let fs = ArcFs::connect(host, ArcFsConfig::default()).unwrap();
//!
//! for entry in fs.list_dir("alice_smith-myarc/data").unwrap() {
//!     println!("{}", entry.name);
//! }
//!
//! let mut text = String::new();
//! fs.open_read("alice_smith-myarc/data/readme.txt")
//!     .unwrap()
//!     .read_to_string(&mut text)
//!     .unwrap();
//!
//! let receipt = fs
//!     .upload("alice_smith-myarc/big.bin", &mut &b"payload"[..], None)
//!     .unwrap();
//! println!("merge request !{} from {}", receipt.merge_request.id, receipt.branch);
//! ```

pub mod config;
pub mod error;
pub mod fs;
pub mod gitlab;
pub mod host;
pub mod index;
pub mod lfs;
pub mod listing;
pub mod reader;
pub mod resolver;
pub mod storage;
pub mod write;

#[cfg(test)]
mod testing;

pub use config::{AmbiguityPolicy, ArcFsConfig, ConfigError, HostConfig};
pub use error::{ErrorKind, FsError, FsResult};
pub use fs::{ArcFs, PendingWrite};
pub use gitlab::GitLabHost;
pub use host::{HostError, HostResult, RepositoryHost};
pub use listing::{DirEntry, DirEntryKind};
pub use reader::BlobStream;
pub use storage::LocalHost;
pub use write::{PendingMergeRequest, WriteError, WriteReceipt, WriteStage};
