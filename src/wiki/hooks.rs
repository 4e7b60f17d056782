//! Post-commit notification hooks.
//!
//! After an edit is committed the wiki calls every registered hook with
//! what changed. Hooks observe; they can't veto or alter the commit, which
//! has already moved the head by the time they run.

use serde::Serialize;
use tracing::info;

use crate::storage::{CommitId, PagePath};

/// What a successful edit committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitEvent {
    pub commit: CommitId,
    pub path: PagePath,
    pub author: String,
    pub email: String,
    pub message: String,
    /// the submission was merged with a concurrent edit
    pub merged: bool,
}

/// Receives commit notifications.
pub trait CommitHook: Send + Sync {
    fn on_commit(&self, event: &CommitEvent);
}

/// Logs every commit through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHook;

impl CommitHook for LogHook {
    fn on_commit(&self, event: &CommitEvent) {
        info!(
            commit = %event.commit.short(),
            path = %event.path,
            author = %event.author,
            merged = event.merged,
            "page updated: {}",
            event.message.lines().next().unwrap_or_default()
        );
    }
}

impl<F> CommitHook for F
where
    F: Fn(&CommitEvent) + Send + Sync,
{
    fn on_commit(&self, event: &CommitEvent) {
        self(event)
    }
}
