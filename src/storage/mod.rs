//! storage layer for gitwiki
//!
//! this module provides a complete abstraction over git for page storage.
//! The upper layers (transaction manager, wiki front end) use this API and
//! never touch git2 directly.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     GitRepository                           │
//! │   (snapshots, writes, commits, head, history, diff, search) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │    tree     │       │    blob     │       │    refs     │
//!  │(directories)│       │   (pages)   │       │   (head)    │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!         │                     │                     │
//!         └─────────────────────┼─────────────────────┘
//!                               │
//!                               ▼
//!                        ┌─────────────┐
//!                        │   commit    │
//!                        │  (history)  │
//!                        └─────────────┘
//!  ```
//!
//! # Usage
//!
//! ```no_run
//! use gitwiki::storage::{GitRepository, GitSignature, PagePath};
//!
//! # fn main() -> Result<(), gitwiki::storage::StorageError> {
//! let repo = GitRepository::open_or_init("./pages")?;
//!
//! // snapshot the head, write, commit, advance
//! let snap = repo.snapshot()?;
//! let path = PagePath::parse("wiki/home.md")?;
//! let root = repo.write_path(snap.tree_id, &path, b"# Home")?;
//! let commit = repo.put_commit(root, snap.commit, &GitSignature::anonymous(), "init")?;
//! repo.advance_head(snap.commit, commit)?;
//! # Ok(())
//! # }
//! ```

mod blob;
mod commit;
mod error;
mod refs;
mod repository;
mod search;
mod tree;
mod types;

// Re-export public API
pub use blob::{decode_text, hash_blob};
pub use commit::{CommitInfo, CommitMessage, PathRevision};
pub use error::{StorageError, StorageResult};
pub use repository::{GitRepository, RepositoryStats, TreeSnapshot};
pub use tree::TreeHandle;
pub use types::{
    BlobId, CommitId, GitSignature, InvalidPathError, ObjectKind, ObjectRef, PagePath, TreeEntry,
    TreeId,
};

// Re-export for internal use by other modules
pub(crate) use search::find_page;
