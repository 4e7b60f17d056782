//! Transaction manager - coordinates all transaction operations.
//!
//! The TransactionManager is the main entry point for transactions.
//! It handles:
//! - Transaction creation and lifecycle
//! - Tracking active transactions
//! - Serializing commits within the process
//! - The optimistic edit flow: write if the client's base is current,
//!   three-way merge if not, retry from a fresh snapshot on a head race

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::storage::{decode_text, BlobId, CommitId, CommitMessage, GitRepository, GitSignature, PagePath};
use crate::text::merge;
use crate::transaction::context::{Transaction, TransactionMetadata, TxActive};
use crate::transaction::error::{TransactionError, TransactionResult};

/// How an edit submission ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EditOutcome {
    /// The base was current; the content was committed as submitted.
    Committed { commit: CommitId },
    /// The base was stale; the merged text was committed.
    Merged { commit: CommitId },
    /// The base was stale and the edits overlap. Nothing was committed.
    Conflict {
        /// merged text with conflict markers, for manual resolution
        text: String,
        /// what the path holds now; the base for the next submission
        current: Option<BlobId>,
        conflicts: usize,
    },
}

impl EditOutcome {
    /// The new commit, unless the edit conflicted.
    pub fn commit(&self) -> Option<CommitId> {
        match self {
            EditOutcome::Committed { commit } | EditOutcome::Merged { commit } => Some(*commit),
            EditOutcome::Conflict { .. } => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EditOutcome::Conflict { .. })
    }
}

/// What an edit attempt prepared inside its transaction.
enum Prepared {
    Write { merged: bool },
    Conflict {
        text: String,
        current: Option<BlobId>,
        conflicts: usize,
    },
}

/// Transaction manager - coordinates all transaction operations.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<TransactionManagerInner>,
}

struct TransactionManagerInner {
    /// The underlying repository.
    repo: GitRepository,
    /// Active transactions tracked by ID.
    active: RwLock<HashMap<String, TransactionMetadata>>,
    /// Mutex for serializing commits.
    commit_lock: Mutex<()>,
    /// Retries after a lost head race before giving up.
    max_retries: usize,
}

impl TransactionManager {
    pub const DEFAULT_MAX_RETRIES: usize = 3;

    /// Create a new transaction manager for the given repository.
    pub fn new(repo: GitRepository) -> Self {
        Self::with_max_retries(repo, Self::DEFAULT_MAX_RETRIES)
    }

    pub fn with_max_retries(repo: GitRepository, max_retries: usize) -> Self {
        Self {
            inner: Arc::new(TransactionManagerInner {
                repo,
                active: RwLock::new(HashMap::new()),
                commit_lock: Mutex::new(()),
                max_retries,
            }),
        }
    }

    /// Get a reference to the underlying repository.
    pub fn repo(&self) -> &GitRepository {
        &self.inner.repo
    }

    /// Begin a new transaction over the current head.
    pub fn begin(&self) -> TransactionResult<Transaction<TxActive>> {
        let tx_id = Ulid::new().to_string().to_lowercase();
        let snapshot = self.inner.repo.snapshot()?;

        let tx = Transaction::new(self.inner.repo.clone(), tx_id.clone(), snapshot);
        debug!(tx = %tx_id, base = ?snapshot.commit.map(|c| c.short()), "transaction started");

        self.inner.active.write().insert(tx_id, tx.metadata.clone());
        Ok(tx)
    }

    /// Get the number of active transactions.
    pub fn active_count(&self) -> usize {
        self.inner.active.read().len()
    }

    /// List all active transaction IDs.
    pub fn active_transactions(&self) -> Vec<String> {
        self.inner.active.read().keys().cloned().collect()
    }

    /// Check if a transaction is active.
    pub fn is_active(&self, tx_id: &str) -> bool {
        self.inner.active.read().contains_key(tx_id)
    }

    /// Get metadata for an active transaction, as of when it began.
    pub fn get_transaction_info(&self, tx_id: &str) -> Option<TransactionMetadata> {
        self.inner.active.read().get(tx_id).cloned()
    }

    pub(crate) fn mark_completed(&self, tx_id: &str) {
        self.inner.active.write().remove(tx_id);
    }

    /// Commit a transaction with serialization.
    ///
    /// The transaction is finished whether or not the commit succeeds.
    pub fn commit_transaction(
        &self,
        tx: Transaction<TxActive>,
        signature: &GitSignature,
        message: &str,
    ) -> TransactionResult<CommitId> {
        let _guard = self.inner.commit_lock.lock();

        let tx_id = tx.id().to_string();
        let result = tx.commit(signature, message);
        self.mark_completed(&tx_id);

        let committed = result?;
        let commit = committed.final_commit()?;
        info!(
            tx = %tx_id,
            commit = %commit.short(),
            author = %signature.name,
            paths = committed.written_paths().len(),
            "transaction committed"
        );
        Ok(commit)
    }

    /// Rollback a transaction.
    pub fn rollback_transaction(&self, tx: Transaction<TxActive>) {
        let tx_id = tx.id().to_string();
        tx.rollback();
        self.mark_completed(&tx_id);
    }

    /// Execute a function within a transaction, automatically committing or rolling back.
    ///
    /// If the function returns Ok and wrote something, the transaction is
    /// committed. If it returns Err or wrote nothing, it is rolled back.
    pub fn with_transaction<F, T>(
        &self,
        signature: &GitSignature,
        message: &str,
        f: F,
    ) -> TransactionResult<T>
    where
        F: FnOnce(&mut Transaction<TxActive>) -> TransactionResult<T>,
    {
        let mut tx = self.begin()?;

        match f(&mut tx) {
            Ok(result) if tx.is_dirty() => {
                self.commit_transaction(tx, signature, message)?;
                Ok(result)
            }
            Ok(result) => {
                self.rollback_transaction(tx);
                Ok(result)
            }
            Err(e) => {
                self.rollback_transaction(tx);
                Err(e)
            }
        }
    }

    /// Get current head.
    pub fn head(&self) -> TransactionResult<Option<CommitId>> {
        self.inner.repo.head().map_err(TransactionError::from)
    }

    /// Submit new content for a page edited from `base`.
    ///
    /// `base` is the blob id the editor started from (`None` for a new page).
    /// If the page still holds `base` the content is committed as is.
    /// Otherwise `base`, the current content and the submission are merged:
    /// a clean merge is committed, a conflicting one is handed back.
    /// Losing a head race re-runs the whole flow on a fresh snapshot, so a
    /// concurrent commit is always merged with, never overwritten.
    pub fn submit_edit(
        &self,
        path: &PagePath,
        base: Option<BlobId>,
        content: &[u8],
        signature: &GitSignature,
        message: &str,
    ) -> TransactionResult<EditOutcome> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt_edit(path, base, content, signature, message) {
                Err(e) if e.is_retryable() => {
                    if attempt > self.inner.max_retries {
                        warn!(path = %path, attempts = attempt, "giving up on edit");
                        return Err(match e {
                            TransactionError::Storage(last) => {
                                TransactionError::RetriesExhausted { attempts: attempt, last }
                            }
                            other => other,
                        });
                    }
                    warn!(path = %path, attempt, error = %e, "head moved, retrying edit");
                }
                other => return other,
            }
        }
    }

    fn attempt_edit(
        &self,
        path: &PagePath,
        base: Option<BlobId>,
        content: &[u8],
        signature: &GitSignature,
        message: &str,
    ) -> TransactionResult<EditOutcome> {
        let mut tx = self.begin()?;

        match Self::prepare_edit(&mut tx, path, base, content) {
            Ok(Prepared::Write { merged: false }) => {
                let commit = self.commit_transaction(tx, signature, message)?;
                Ok(EditOutcome::Committed { commit })
            }
            Ok(Prepared::Write { merged: true }) => {
                let message = CommitMessage::merged(message, path);
                let commit = self.commit_transaction(tx, signature, &message)?;
                info!(path = %path, commit = %commit.short(), "concurrent edits merged");
                Ok(EditOutcome::Merged { commit })
            }
            Ok(Prepared::Conflict {
                text,
                current,
                conflicts,
            }) => {
                self.rollback_transaction(tx);
                warn!(path = %path, conflicts, "edit conflicts with current content");
                Ok(EditOutcome::Conflict {
                    text,
                    current,
                    conflicts,
                })
            }
            Err(e) => {
                self.rollback_transaction(tx);
                Err(e)
            }
        }
    }

    fn prepare_edit(
        tx: &mut Transaction<TxActive>,
        path: &PagePath,
        base: Option<BlobId>,
        content: &[u8],
    ) -> TransactionResult<Prepared> {
        let current = tx.blob_id(path)?;
        if current == base {
            tx.write(path, content)?;
            return Ok(Prepared::Write { merged: false });
        }

        debug!(
            path = %path,
            base = ?base.map(|b| b.short()),
            current = ?current.map(|c| c.short()),
            "stale base, merging"
        );
        let base_text = Self::blob_text(tx, base)?;
        let mine = Self::blob_text(tx, current)?;
        let theirs = decode_text(content.to_vec(), "submitted content")?;

        let outcome = merge(&base_text, &mine, &theirs);
        if outcome.is_clean() {
            tx.write(path, outcome.text.as_bytes())?;
            Ok(Prepared::Write { merged: true })
        } else {
            Ok(Prepared::Conflict {
                text: outcome.text,
                current,
                conflicts: outcome.conflicts,
            })
        }
    }

    /// text of a blob; a page that does not exist reads as empty
    fn blob_text(tx: &Transaction<TxActive>, id: Option<BlobId>) -> TransactionResult<String> {
        match id {
            Some(id) => {
                let bytes = tx.repo.get_blob(id)?;
                Ok(decode_text(bytes, &id.to_string())?)
            }
            None => Ok(String::new()),
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active_count", &self.active_count())
            .field("max_retries", &self.inner.max_retries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{hash_blob, StorageError};
    use crate::text::{MARKER_CURRENT, MARKER_SUBMITTED};
    use std::thread;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TransactionManager) {
        let dir = TempDir::new().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        let manager = TransactionManager::new(repo);
        (dir, manager)
    }

    fn path(s: &str) -> PagePath {
        PagePath::parse(s).unwrap()
    }

    fn alice() -> GitSignature {
        GitSignature::new("alice", "a@x")
    }

    fn read(manager: &TransactionManager, p: &str) -> String {
        let tx = manager.begin().unwrap();
        let text = tx.read_text(&path(p)).unwrap();
        manager.rollback_transaction(tx);
        text
    }

    #[test]
    fn test_begin_and_commit() {
        let (_dir, manager) = setup();

        let mut tx = manager.begin().unwrap();
        assert!(manager.is_active(tx.id()));
        assert_eq!(manager.get_transaction_info(tx.id()).unwrap().base_commit, None);

        tx.write(&path("a.md"), b"a").unwrap();
        let commit = manager.commit_transaction(tx, &alice(), "a").unwrap();

        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.head().unwrap(), Some(commit));
    }

    #[test]
    fn test_begin_and_rollback() {
        let (_dir, manager) = setup();

        let mut tx = manager.begin().unwrap();
        tx.write(&path("a.md"), b"a").unwrap();
        manager.rollback_transaction(tx);

        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.head().unwrap(), None);
    }

    #[test]
    fn test_failed_commit_is_not_left_active() {
        let (_dir, manager) = setup();
        let tx = manager.begin().unwrap();
        assert!(manager.commit_transaction(tx, &alice(), "empty").is_err());
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_with_transaction() {
        let (_dir, manager) = setup();

        let written = manager
            .with_transaction(&alice(), "two pages", |tx| {
                tx.write(&path("a.md"), b"a")?;
                tx.write(&path("b.md"), b"b")?;
                Ok(tx.written_paths().len())
            })
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(read(&manager, "b.md"), "b");
        assert_eq!(manager.repo().history(None, None).unwrap().len(), 1);
    }

    #[test]
    fn test_with_transaction_rollback_on_error() {
        let (_dir, manager) = setup();

        let result: TransactionResult<()> = manager.with_transaction(&alice(), "fails", |tx| {
            tx.write(&path("a.md"), b"a")?;
            Err(TransactionError::Internal("test error".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(manager.head().unwrap(), None);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_with_transaction_read_only() {
        let (_dir, manager) = setup();
        let exists = manager
            .with_transaction(&alice(), "noop", |tx| tx.exists(&path("a.md")))
            .unwrap();
        assert!(!exists);
        assert_eq!(manager.head().unwrap(), None);
    }

    #[test]
    fn test_active_transactions() {
        let (_dir, manager) = setup();

        let tx1 = manager.begin().unwrap();
        let tx2 = manager.begin().unwrap();
        assert_eq!(manager.active_count(), 2);
        assert!(manager.active_transactions().contains(&tx1.id().to_string()));

        manager.rollback_transaction(tx1);
        assert_eq!(manager.active_count(), 1);

        manager.rollback_transaction(tx2);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_submit_new_page() {
        let (_dir, manager) = setup();
        let outcome = manager
            .submit_edit(&path("wiki/home.md"), None, b"# Home", &alice(), "init")
            .unwrap();

        assert!(matches!(outcome, EditOutcome::Committed { .. }));
        assert_eq!(manager.head().unwrap(), outcome.commit());
        assert_eq!(read(&manager, "wiki/home.md"), "# Home");
    }

    #[test]
    fn test_submit_with_current_base() {
        let (_dir, manager) = setup();
        manager
            .submit_edit(&path("a.md"), None, b"one\n", &alice(), "one")
            .unwrap();

        let base = Some(hash_blob(b"one\n").unwrap());
        let outcome = manager
            .submit_edit(&path("a.md"), base, b"two\n", &alice(), "two")
            .unwrap();
        assert!(matches!(outcome, EditOutcome::Committed { .. }));
        assert_eq!(read(&manager, "a.md"), "two\n");
    }

    #[test]
    fn test_stale_base_merges_disjoint_edits() {
        let (_dir, manager) = setup();
        let base_text = "# Home\n\nintro\n\nfooter\n";
        manager
            .submit_edit(&path("home.md"), None, base_text.as_bytes(), &alice(), "init")
            .unwrap();
        let base = Some(hash_blob(base_text.as_bytes()).unwrap());

        // someone else edits the intro first
        manager
            .submit_edit(&path("home.md"), base, b"# Home\n\nintro, revised\n\nfooter\n", &alice(), "intro")
            .unwrap();

        // our edit still names the original base
        let outcome = manager
            .submit_edit(&path("home.md"), base, b"# Home\n\nintro\n\nnew footer\n", &alice(), "footer")
            .unwrap();

        assert!(matches!(outcome, EditOutcome::Merged { .. }));
        assert_eq!(read(&manager, "home.md"), "# Home\n\nintro, revised\n\nnew footer\n");

        let info = manager.repo().get_commit(outcome.commit().unwrap()).unwrap();
        assert!(info.message.starts_with("footer (merged"));
    }

    #[test]
    fn test_stale_base_conflict_commits_nothing() {
        let (_dir, manager) = setup();
        manager
            .submit_edit(&path("a.md"), None, b"foo\n", &alice(), "init")
            .unwrap();
        let base = Some(hash_blob(b"foo\n").unwrap());
        manager
            .submit_edit(&path("a.md"), base, b"foo\nbar\n", &alice(), "bar")
            .unwrap();
        let head = manager.head().unwrap();

        let outcome = manager
            .submit_edit(&path("a.md"), base, b"foo\nbaz\n", &alice(), "baz")
            .unwrap();

        match outcome {
            EditOutcome::Conflict { text, current, conflicts } => {
                assert_eq!(conflicts, 1);
                assert!(text.contains(MARKER_CURRENT) && text.contains(MARKER_SUBMITTED));
                assert!(text.contains("bar") && text.contains("baz"));
                assert_eq!(current, Some(hash_blob(b"foo\nbar\n").unwrap()));
            }
            other => panic!("expected a conflict, got {:?}", other),
        }
        assert_eq!(manager.head().unwrap(), head);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_new_page_created_concurrently() {
        let (_dir, manager) = setup();
        manager
            .submit_edit(&path("a.md"), None, b"theirs\n", &alice(), "first")
            .unwrap();

        // both sides "created" the page: an add/add conflict
        let outcome = manager
            .submit_edit(&path("a.md"), None, b"mine\n", &alice(), "second")
            .unwrap();
        assert!(outcome.is_conflict());
    }

    #[test]
    fn test_write_over_directory_is_refused() {
        let (_dir, manager) = setup();
        manager
            .submit_edit(&path("docs/a.md"), None, b"a", &alice(), "a")
            .unwrap();

        let result = manager.submit_edit(&path("docs"), None, b"x", &alice(), "x");
        assert!(matches!(
            result,
            Err(TransactionError::Storage(StorageError::TypeMismatch { .. }))
        ));
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_concurrent_edits_lose_nothing() {
        let dir = TempDir::new().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        let manager = TransactionManager::with_max_retries(repo, 100);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let manager = manager.clone();
                thread::spawn(move || {
                    for i in 0..5 {
                        let p = path(&format!("t{}/page{}.md", t, i));
                        let outcome = manager
                            .submit_edit(&p, None, format!("{}-{}", t, i).as_bytes(), &alice(), "edit")
                            .unwrap();
                        assert!(matches!(outcome, EditOutcome::Committed { .. }));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // every edit is a commit on one chain, and every page survived
        assert_eq!(manager.repo().history(None, None).unwrap().len(), 20);
        for t in 0..4 {
            for i in 0..5 {
                assert_eq!(read(&manager, &format!("t{}/page{}.md", t, i)), format!("{}-{}", t, i));
            }
        }
        assert_eq!(manager.active_count(), 0);
    }
}
