//! Head reference management.
//!
//! The store has exactly one mutable pointer: the branch HEAD names
//! symbolically. A store created here starts on `refs/heads/main`; a store
//! created by stock git keeps whatever branch its HEAD names. Before the
//! first commit the branch is unborn and the head is `None`.
//!
//! The head only moves by compare-and-set. A writer states which commit it
//! built on; if the branch no longer points there the update is refused with
//! [`StorageError::HeadMoved`] and nothing is overwritten.

use git2::{ErrorCode, Repository};
use tracing::{info, warn};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::CommitId;

/// Manages the head reference.
pub struct RefManager;

impl RefManager {
    /// initial branch of a store created by [`GitRepository::init`](crate::storage::GitRepository::init)
    pub const INITIAL_BRANCH: &'static str = "main";

    /// The branch HEAD points at, e.g. `refs/heads/main`.
    ///
    /// A detached HEAD has no branch to advance and is refused.
    pub fn head_ref(repo: &Repository) -> StorageResult<String> {
        let head = repo.find_reference("HEAD")?;
        match head.symbolic_target() {
            Some(target) => Ok(target.to_string()),
            None => Err(StorageError::Internal(
                "HEAD is detached; the page store needs HEAD to name a branch".to_string(),
            )),
        }
    }

    /// Get the current head commit, or `None` for an empty store.
    pub fn head_commit(repo: &Repository) -> StorageResult<Option<CommitId>> {
        let name = Self::head_ref(repo)?;
        Self::branch_commit(repo, &name)
    }

    fn branch_commit(repo: &Repository, name: &str) -> StorageResult<Option<CommitId>> {
        let reference = match repo.find_reference(name) {
            Ok(reference) => reference,
            Err(e) if matches!(e.code(), ErrorCode::NotFound | ErrorCode::UnbornBranch) => {
                return Ok(None);
            }
            Err(e) => return Err(StorageError::Git(e)),
        };

        let commit = reference.peel_to_commit()?;
        Ok(Some(CommitId::new(commit.id())))
    }

    /// Point head at `new`, provided it still points at `expected`.
    ///
    /// `expected == None` means "the store is still empty": the branch is
    /// created and the call fails if someone else created it first.
    pub fn advance_head(
        repo: &Repository,
        expected: Option<CommitId>,
        new: CommitId,
    ) -> StorageResult<()> {
        let name = Self::head_ref(repo)?;
        let log_message = format!("commit: advance head to {}", new.short());

        let result = match expected {
            Some(old) => repo
                .reference_matching(&name, new.raw(), true, old.raw(), &log_message)
                .map(|_| ()),
            None => repo
                .reference(&name, new.raw(), false, &log_message)
                .map(|_| ()),
        };

        match result {
            Ok(()) => {
                info!(
                    branch = %name,
                    from = %expected.map_or_else(|| "(empty)".to_string(), |c| c.short()),
                    to = %new.short(),
                    "head advanced"
                );
                Ok(())
            }
            Err(e)
                if matches!(
                    e.code(),
                    ErrorCode::Modified | ErrorCode::Exists | ErrorCode::NotFound | ErrorCode::Locked
                ) =>
            {
                let found = Self::branch_commit(repo, &name)?;
                warn!(
                    branch = %name,
                    expected = ?expected.map(|c| c.short()),
                    found = ?found.map(|c| c.short()),
                    "head moved during commit"
                );
                Err(StorageError::head_moved(expected, found))
            }
            Err(e) => Err(StorageError::Git(e)),
        }
    }
}
