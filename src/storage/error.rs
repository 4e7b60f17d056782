//! Storage layer error types
//!
//! All errors that can occur during storage operations are defined here.
//! The object layer never folds a failure into a default value: a missing
//! path, a corrupt object and a lost head race are all distinct variants.

use thiserror::Error;

use crate::storage::types::{CommitId, InvalidPathError, ObjectKind, PagePath};

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// error from the underlying Git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// nothing is stored at the path
    #[error("path not found: {0}")]
    PathNotFound(PagePath),

    /// the OID does not name an object in the store
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// the path is blocked by an entry of the wrong kind
    #[error("blocked by existing {found} at {path}: expected {expected}")]
    TypeMismatch {
        path: PagePath,
        expected: ObjectKind,
        found: ObjectKind,
    },

    /// the path was rejected before any store access
    #[error("invalid path: {0}")]
    InvalidPath(#[from] InvalidPathError),

    /// blob content could not be decoded as UTF-8 text
    #[error("cannot decode {what} as text: {source}")]
    DecodeFailure {
        what: String,
        #[source]
        source: std::str::Utf8Error,
    },

    /// a stored object does not have the structure it should
    #[error("corrupted object {oid}: {reason}")]
    CorruptedObject { oid: String, reason: String },

    /// head no longer points at the commit the caller started from
    #[error("head moved: expected {expected}, found {found}")]
    HeadMoved {
        expected: String,
        found: String,
    },

    /// repo is not initialized
    #[error("repository not initialized: {0}")]
    NotInitialized(std::path::PathBuf),

    /// the commit was not found
    #[error("commit not found: {0}")]
    CommitNotFound(CommitId),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::PathNotFound(_)
                | StorageError::ObjectNotFound(_)
                | StorageError::CommitNotFound(_)
        )
    }

    /// check if this error is a conflict with existing state
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::TypeMismatch { .. } | StorageError::HeadMoved { .. }
        )
    }

    /// check if this error is recoverable by re-snapshotting and retrying
    pub fn is_retriable(&self) -> bool {
        matches!(self, StorageError::HeadMoved { .. })
    }

    /// describe a head position for a HeadMoved error
    pub(crate) fn head_moved(expected: Option<CommitId>, found: Option<CommitId>) -> Self {
        let show = |id: Option<CommitId>| id.map_or_else(|| "(empty)".to_string(), |c| c.to_string());
        StorageError::HeadMoved {
            expected: show(expected),
            found: show(found),
        }
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
