//! Transaction context using typestate pattern.
//!
//! The typestate pattern ensures at compile time that transactions
//! are used correctly:
//! - Only active transactions can read, write or commit
//! - Committed/aborted transactions cannot be reused
//!
//! A transaction is a snapshot of the head taken when it begins. Reads see
//! that snapshot plus the transaction's own writes, never another
//! transaction's commits. Writes only build a pending root tree; nothing is
//! visible to anyone else until `commit` moves the head.

use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::storage::{
    decode_text, find_page, BlobId, CommitId, GitRepository, GitSignature, ObjectRef, PagePath,
    PathRevision, StorageResult, TreeEntry, TreeHandle, TreeId, TreeSnapshot,
};
use crate::transaction::error::{TransactionError, TransactionResult};

/// Marker type for active transactions.
#[derive(Debug)]
pub struct TxActive;

/// Marker type for committed transactions.
#[derive(Debug)]
pub struct TxCommitted;

/// Marker type for aborted transactions.
#[derive(Debug)]
pub struct TxAborted;

/// Transaction metadata stored in the manager.
#[derive(Debug, Clone)]
pub struct TransactionMetadata {
    /// Unique transaction ID.
    pub tx_id: String,
    /// Head when the transaction began; `None` for an empty store.
    pub base_commit: Option<CommitId>,
    /// Root tree of the base commit.
    pub base_tree: TreeId,
    /// Root tree including this transaction's writes.
    pub pending_tree: Option<TreeId>,
    /// Paths written, in order.
    pub written: Vec<PagePath>,
    /// Commit created by `commit`.
    pub final_commit: Option<CommitId>,
    /// When the transaction started.
    pub started_at: DateTime<Utc>,
}

/// A page store transaction with typestate for lifecycle safety.
///
/// The `State` parameter tracks whether the transaction is:
/// - `TxActive`: Can perform operations
/// - `TxCommitted`: Successfully committed, no more operations allowed
/// - `TxAborted`: Rolled back, no more operations allowed
pub struct Transaction<State> {
    pub(crate) metadata: TransactionMetadata,
    pub(crate) repo: GitRepository,
    _state: PhantomData<State>,
}

impl<State> Transaction<State> {
    /// Get the transaction ID.
    pub fn id(&self) -> &str {
        &self.metadata.tx_id
    }

    /// Get the transaction's base commit (where it started).
    pub fn base_commit(&self) -> Option<CommitId> {
        self.metadata.base_commit
    }

    pub fn base_tree(&self) -> TreeId {
        self.metadata.base_tree
    }

    /// Paths this transaction wrote to, each once, in first-write order.
    pub fn written_paths(&self) -> &[PagePath] {
        &self.metadata.written
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.metadata.started_at
    }

    fn into_state<Next>(self) -> Transaction<Next> {
        Transaction {
            metadata: self.metadata,
            repo: self.repo,
            _state: PhantomData,
        }
    }
}

impl Transaction<TxActive> {
    /// Create a new active transaction over a snapshot.
    pub(crate) fn new(repo: GitRepository, tx_id: String, snapshot: TreeSnapshot) -> Self {
        Self {
            metadata: TransactionMetadata {
                tx_id,
                base_commit: snapshot.commit,
                base_tree: snapshot.tree_id,
                pending_tree: None,
                written: Vec::new(),
                final_commit: None,
                started_at: Utc::now(),
            },
            repo,
            _state: PhantomData,
        }
    }

    /// The tree reads go against: own writes if any, else the snapshot.
    pub fn read_tree(&self) -> TreeId {
        self.metadata.pending_tree.unwrap_or(self.metadata.base_tree)
    }

    pub fn pending_tree(&self) -> Option<TreeId> {
        self.metadata.pending_tree
    }

    /// Whether anything has been written.
    pub fn is_dirty(&self) -> bool {
        self.metadata.pending_tree.is_some()
    }

    fn with_tree<T, F>(&self, f: F) -> TransactionResult<T>
    where
        F: FnOnce(&TreeHandle<'_>) -> StorageResult<T>,
    {
        let root = self.read_tree();
        self.repo
            .with_repo(|repo| f(&TreeHandle::new(repo, root)))
            .map_err(TransactionError::from)
    }

    // ==================== Reads ====================

    pub fn resolve(&self, path: &PagePath) -> TransactionResult<ObjectRef> {
        self.with_tree(|t| t.resolve(path))
    }

    pub fn exists(&self, path: &PagePath) -> TransactionResult<bool> {
        self.with_tree(|t| t.exists(path))
    }

    pub fn is_dir(&self, path: &PagePath) -> TransactionResult<bool> {
        self.with_tree(|t| t.is_dir(path))
    }

    pub fn is_file(&self, path: &PagePath) -> TransactionResult<bool> {
        self.with_tree(|t| t.is_file(path))
    }

    pub fn can_create(&self, path: &PagePath) -> TransactionResult<bool> {
        self.with_tree(|t| t.can_create(path))
    }

    /// The blob id at `path` if it is a file.
    pub fn blob_id(&self, path: &PagePath) -> TransactionResult<Option<BlobId>> {
        self.with_tree(|t| t.blob_id(path))
    }

    /// Read the raw bytes of a page.
    pub fn read(&self, path: &PagePath) -> TransactionResult<Vec<u8>> {
        self.with_tree(|t| t.read(path))
    }

    /// Read a page as UTF-8 text.
    pub fn read_text(&self, path: &PagePath) -> TransactionResult<String> {
        let bytes = self.read(path)?;
        decode_text(bytes, &path.to_string()).map_err(TransactionError::from)
    }

    /// Entries of the directory at `path`, sorted by name.
    pub fn list(&self, path: &PagePath) -> TransactionResult<Vec<TreeEntry>> {
        self.with_tree(|t| t.list(path))
    }

    /// First page whose file name is `basename.extension`.
    pub fn find_page(&self, basename: &str, extension: &str) -> TransactionResult<Option<PagePath>> {
        let root = self.read_tree();
        self.repo
            .with_repo(|repo| find_page(repo, root, basename, extension))
            .map_err(TransactionError::from)
    }

    /// Pages containing `keyword`, at most `limit` of them.
    pub fn search(&self, keyword: &str, limit: Option<usize>) -> TransactionResult<Vec<PagePath>> {
        self.repo
            .search(self.read_tree(), keyword, limit)
            .map_err(TransactionError::from)
    }

    /// Commits up to the snapshot that changed `path`, newest first.
    pub fn history(&self, path: &PagePath, limit: Option<usize>) -> TransactionResult<Vec<PathRevision>> {
        match self.metadata.base_commit {
            Some(base) => self
                .repo
                .path_history(path, Some(base), limit)
                .map_err(TransactionError::from),
            None => Ok(Vec::new()),
        }
    }

    // ==================== Writes ====================

    /// Store `content` at `path` in the pending tree.
    pub fn write(&mut self, path: &PagePath, content: &[u8]) -> TransactionResult<TreeId> {
        let root = self.repo.write_path(self.read_tree(), path, content)?;
        self.metadata.pending_tree = Some(root);
        if !self.metadata.written.contains(path) {
            self.metadata.written.push(path.clone());
        }
        debug!(tx = %self.metadata.tx_id, path = %path, root = %root, "pending write");
        Ok(root)
    }

    // ==================== Transaction Control ====================

    /// Commit the pending tree on top of the base commit.
    ///
    /// The head must still be at the base commit; if another transaction
    /// committed first this fails with a retriable `HeadMoved` and the head
    /// is left untouched.
    pub fn commit(
        self,
        signature: &GitSignature,
        message: &str,
    ) -> TransactionResult<Transaction<TxCommitted>> {
        let pending = self.metadata.pending_tree.ok_or_else(|| {
            TransactionError::InvalidOperation(format!(
                "transaction {} has nothing to commit",
                self.metadata.tx_id
            ))
        })?;

        let base = self.metadata.base_commit;
        let commit_id = self.repo.put_commit(pending, base, signature, message)?;
        self.repo.advance_head(base, commit_id)?;

        let mut committed = self.into_state::<TxCommitted>();
        committed.metadata.final_commit = Some(commit_id);
        Ok(committed)
    }

    /// Rollback the transaction.
    ///
    /// The pending tree is simply dropped; objects it wrote stay
    /// unreferenced in the store.
    pub fn rollback(self) -> Transaction<TxAborted> {
        debug!(tx = %self.metadata.tx_id, dirty = self.is_dirty(), "transaction rolled back");
        self.into_state()
    }
}

impl Transaction<TxCommitted> {
    /// Get the commit ID created by the transaction.
    pub fn final_commit(&self) -> TransactionResult<CommitId> {
        self.metadata.final_commit.ok_or_else(|| {
            TransactionError::Internal(format!(
                "committed transaction {} has no commit",
                self.metadata.tx_id
            ))
        })
    }
}

impl Transaction<TxAborted> {
    pub fn was_rolled_back(&self) -> bool {
        true
    }
}
