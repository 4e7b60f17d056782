//! Transaction error types.

use thiserror::Error;

use crate::storage::StorageError;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Head kept moving; every attempt lost the race.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        last: StorageError,
    },

    /// Invalid operation for current transaction state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Internal error.
    #[error("internal transaction error: {0}")]
    Internal(String),
}

impl TransactionError {
    /// Check if this error is retryable from a fresh snapshot.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransactionError::Storage(e) => e.is_retriable(),
            _ => false,
        }
    }

    /// The storage error underneath, if there is one.
    pub fn storage(&self) -> Option<&StorageError> {
        match self {
            TransactionError::Storage(e) => Some(e),
            TransactionError::RetriesExhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}
