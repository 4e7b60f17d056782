//! Core Git repository wrapper.
//!
//! This is the central component of the storage layer. It wraps
//! `git2::Repository` with thread-safe access and provides the operations
//! the transaction layer is built from.
//!
//! The repository is bare: pages only ever exist as objects, never as a
//! checked-out working tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{Repository, RepositoryInitOptions};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::storage::blob;
use crate::storage::commit::{self, CommitBuilder, CommitInfo, HistoryIterator, PathHistory, PathRevision};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::refs::RefManager;
use crate::storage::search;
use crate::storage::tree::{self, get_tree};
use crate::storage::types::{BlobId, CommitId, GitSignature, ObjectRef, PagePath, TreeEntry, TreeId};
use crate::text::{diff_text, BlobDiff};

/// The main Git repository wrapper.
///
/// Clone this to share across threads - it uses Arc internally.
/// `git2::Repository` is not `Sync`, so every access goes through one lock;
/// objects are immutable, and the head only moves by compare-and-set, so
/// holding the lock never spans more than one storage call.
#[derive(Clone)]
pub struct GitRepository {
    inner: Arc<GitRepositoryInner>,
}

struct GitRepositoryInner {
    repo: Mutex<Repository>,
    path: PathBuf,
}

impl GitRepository {
    fn from_repo(repo: Repository, path: &Path) -> Self {
        Self {
            inner: Arc::new(GitRepositoryInner {
                repo: Mutex::new(repo),
                path: path.to_path_buf(),
            }),
        }
    }

    /// Open an existing repository.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo =
            Repository::open(path).map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;
        Ok(Self::from_repo(repo, path))
    }

    /// Initialize a new, empty repository.
    ///
    /// No commit is made: the head stays unborn until the first edit.
    pub fn init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let mut opts = RepositoryInitOptions::new();
        opts.bare(true)
            .initial_head(RefManager::INITIAL_BRANCH)
            .mkpath(true);
        let repo = Repository::init_opts(path, &opts)?;

        info!(path = %path.display(), "initialized page store");
        Ok(Self::from_repo(repo, path))
    }

    /// Open or initialize a repository.
    pub fn open_or_init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if path.join("HEAD").exists() || path.join(".git").exists() {
            Self::open(path)
        } else {
            Self::init(path)
        }
    }

    /// Get the repository path.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Execute a function with access to the repository.
    ///
    /// Lazy iterators borrowed from the repository live only inside `f`.
    pub fn with_repo<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.repo.lock();
        f(&repo)
    }

    // ==================== Head and snapshots ====================

    /// Get the current head commit; `None` while the store is empty.
    pub fn head(&self) -> StorageResult<Option<CommitId>> {
        self.with_repo(RefManager::head_commit)
    }

    /// The head commit and its root tree, read under one lock.
    pub fn snapshot(&self) -> StorageResult<TreeSnapshot> {
        self.with_repo(|repo| {
            let commit = RefManager::head_commit(repo)?;
            let tree_id = Self::root_tree(repo, commit)?;
            Ok(TreeSnapshot { commit, tree_id })
        })
    }

    /// The root tree of a commit, or the empty tree for `None`.
    pub fn tree_at(&self, at: Option<CommitId>) -> StorageResult<TreeId> {
        self.with_repo(|repo| Self::root_tree(repo, at))
    }

    fn root_tree(repo: &Repository, at: Option<CommitId>) -> StorageResult<TreeId> {
        match at {
            Some(id) => Ok(commit::get_commit(repo, id)?.tree_id),
            None => tree::empty_tree(repo),
        }
    }

    /// Get information about a commit.
    pub fn get_commit(&self, id: CommitId) -> StorageResult<CommitInfo> {
        self.with_repo(|repo| commit::get_commit(repo, id))
    }

    // ==================== Objects ====================

    pub fn put_blob(&self, content: &[u8]) -> StorageResult<BlobId> {
        self.with_repo(|repo| blob::put_blob(repo, content))
    }

    pub fn get_blob(&self, id: BlobId) -> StorageResult<Vec<u8>> {
        self.with_repo(|repo| blob::get_blob(repo, id))
    }

    /// Store a directory snapshot; the same entries always give the same id.
    pub fn put_tree(&self, entries: &[TreeEntry]) -> StorageResult<TreeId> {
        self.with_repo(|repo| tree::put_tree(repo, entries))
    }

    /// Entries of a stored tree, sorted by name.
    pub fn get_tree(&self, id: TreeId) -> StorageResult<Vec<TreeEntry>> {
        self.with_repo(|repo| get_tree(repo, id))
    }

    /// Store `content` at `path` below `root`, returning the new root.
    pub fn write_path(&self, root: TreeId, path: &PagePath, content: &[u8]) -> StorageResult<TreeId> {
        self.with_repo(|repo| tree::write_path(repo, root, path, content))
    }

    /// Create a commit object for `tree`. The head is not moved.
    pub fn put_commit(
        &self,
        tree: TreeId,
        parent: Option<CommitId>,
        signature: &GitSignature,
        message: &str,
    ) -> StorageResult<CommitId> {
        self.with_repo(|repo| {
            CommitBuilder::new(repo)
                .tree(tree)
                .parent(parent)
                .signature(signature.clone())
                .message(message)
                .commit()
        })
    }

    /// Move the head from `expected` to `new`, or fail with `HeadMoved`.
    pub fn advance_head(&self, expected: Option<CommitId>, new: CommitId) -> StorageResult<()> {
        self.with_repo(|repo| RefManager::advance_head(repo, expected, new))
    }

    // ==================== History ====================

    /// Commit history from `from` (or the head), newest first.
    pub fn history(&self, from: Option<CommitId>, limit: Option<usize>) -> StorageResult<Vec<CommitInfo>> {
        self.with_repo(|repo| {
            let iter = Self::walk_from(repo, from)?;
            match limit {
                Some(n) => iter.take(n).collect(),
                None => iter.collect(),
            }
        })
    }

    /// Commits that changed `path`, newest first, stopping after `limit`.
    pub fn path_history(
        &self,
        path: &PagePath,
        from: Option<CommitId>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<PathRevision>> {
        self.with_repo(|repo| {
            let iter = PathHistory::new(Self::walk_from(repo, from)?, path.clone());
            match limit {
                Some(n) => iter.take(n).collect(),
                None => iter.collect(),
            }
        })
    }

    fn walk_from(repo: &Repository, from: Option<CommitId>) -> StorageResult<HistoryIterator<'_>> {
        let start = match from {
            Some(id) => Some(id),
            None => RefManager::head_commit(repo)?,
        };
        match start {
            Some(id) => HistoryIterator::new(repo, id),
            None => HistoryIterator::empty(repo),
        }
    }

    // ==================== Diff and search ====================

    /// Line diff between two stored blobs.
    ///
    /// `None` if either id is missing or names something other than a blob;
    /// binary content is a `DecodeFailure`.
    pub fn diff(&self, old: BlobId, new: BlobId) -> StorageResult<Option<BlobDiff>> {
        self.with_repo(|repo| {
            let (old_bytes, new_bytes) = match (blob::get_blob(repo, old), blob::get_blob(repo, new)) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(e), _) | (_, Err(e)) => {
                    return match e {
                        StorageError::ObjectNotFound(_) | StorageError::CorruptedObject { .. } => Ok(None),
                        e => Err(e),
                    };
                }
            };
            let old_text = blob::decode_text(old_bytes, &old.to_string())?;
            let new_text = blob::decode_text(new_bytes, &new.to_string())?;
            Ok(Some(diff_text(&old_text, &new_text)))
        })
    }

    /// Pages below `root` containing `keyword`, stopping after `limit`.
    pub fn search(&self, root: TreeId, keyword: &str, limit: Option<usize>) -> StorageResult<Vec<PagePath>> {
        self.with_repo(|repo| {
            let iter = search::search(repo, root, keyword);
            match limit {
                Some(n) => iter.take(n).collect(),
                None => iter.collect(),
            }
        })
    }

    // ==================== Utility Operations ====================

    /// Get statistics about the snapshot at `at` (the head if `None`).
    pub fn stats(&self, at: Option<CommitId>) -> StorageResult<RepositoryStats> {
        self.with_repo(|repo| {
            let at = match at {
                Some(id) => Some(id),
                None => RefManager::head_commit(repo)?,
            };
            let root = Self::root_tree(repo, at)?;

            let mut stats = RepositoryStats {
                commit_count: match at {
                    Some(id) => HistoryIterator::new(repo, id)?.count(),
                    None => 0,
                },
                ..RepositoryStats::default()
            };

            let mut pending = vec![root];
            while let Some(tree_id) = pending.pop() {
                for entry in get_tree(repo, tree_id)? {
                    match entry.object {
                        ObjectRef::Blob(id) => {
                            stats.page_count += 1;
                            stats.total_bytes += blob::find_blob(repo, id)?.size() as u64;
                        }
                        ObjectRef::Tree(id) => {
                            stats.dir_count += 1;
                            pending.push(id);
                        }
                    }
                }
            }

            Ok(stats)
        })
    }
}

/// The head commit at one instant and the tree it points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeSnapshot {
    /// `None` for an empty store
    pub commit: Option<CommitId>,
    pub tree_id: TreeId,
}

/// Statistics about the repository.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepositoryStats {
    pub page_count: usize,
    pub dir_count: usize,
    pub commit_count: usize,
    pub total_bytes: u64,
}

impl std::fmt::Display for RepositoryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Repository Statistics:")?;
        writeln!(f, "  Pages: {}", self.page_count)?;
        writeln!(f, "  Directories: {}", self.dir_count)?;
        writeln!(f, "  Commits: {}", self.commit_count)?;
        writeln!(f, "  Total Bytes: {}", self.total_bytes)
    }
}
