//! Transaction management for gitwiki.
//!
//! Every request runs in its own transaction: a snapshot of the head taken
//! when it begins. Writes build a pending tree private to the transaction;
//! commit moves the head by compare-and-set from the snapshot's commit, so
//! of two transactions racing from the same base exactly one wins and the
//! other has to start over from the new head.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionManager                        │
//! │  (tracks active tx, serializes commits, edit/merge/retry)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                 ┌────────────┴────────────┐
//!                 │                         │
//!                 ▼                         ▼
//!          ┌─────────────┐           ┌─────────────┐
//!          │ Transaction │           │    text     │
//!          │  (Context)  │           │   (merge)   │
//!          └─────────────┘           └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use gitwiki::storage::{GitRepository, GitSignature, PagePath};
//! use gitwiki::transaction::TransactionManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = TransactionManager::new(GitRepository::open_or_init("./pages")?);
//! let author = GitSignature::new("alice", "alice@localhost");
//!
//! let mut tx = manager.begin()?;
//! tx.write(&PagePath::parse("wiki/home.md")?, b"# Home")?;
//! manager.commit_transaction(tx, &author, "init")?;
//! # Ok(())
//! # }
//! ```

mod context;
mod error;
mod manager;

pub use context::{Transaction, TransactionMetadata, TxAborted, TxActive, TxCommitted};
pub use error::{TransactionError, TransactionResult};
pub use manager::{EditOutcome, TransactionManager};
