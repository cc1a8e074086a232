//! The local repository host.
//!
//! A directory of bare git repositories plus a shared LFS object store,
//! served through [`LocalHost`]. Used for tests, demos and offline work.
//!
//! ```text
//!                  ┌─────────────┐
//!                  │  LocalHost  │
//!                  └─────────────┘
//!          ┌──────────────┼──────────────┐
//!          ▼              ▼              ▼
//!   ┌─────────────┐ ┌───────────┐ ┌─────────────┐
//!   │GitRepository│ │ LfsStore  │ │  Registry   │
//!   └─────────────┘ └───────────┘ └─────────────┘
//!     tree / refs / commit
//! ```

mod commit;
mod lfs_store;
mod local;
mod refs;
mod registry;
mod repository;
mod tree;

pub use commit::GitSignature;
pub use local::LocalHost;
