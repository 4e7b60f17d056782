//! Commit creation and history traversal
//!
//! commits are the immutable snapshots of the page store:
//! - each accepted edit creates exactly one commit
//! - history is a single first-parent chain ending in a parentless root
//! - per-page history is that chain filtered to commits that changed the page
//!
//! this module handles commit creation and the lazy history walkers

use chrono::{DateTime, TimeZone, Utc};
use git2::{Repository, Revwalk, Sort};
use serde::Serialize;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::tree::try_resolve;
use crate::storage::types::{CommitId, GitSignature, ObjectRef, PagePath, TreeId};

/// information about a commit
#[derive(Debug, Clone, Serialize)]
pub struct CommitInfo {
    pub id: CommitId,
    pub tree_id: TreeId,
    pub parent_ids: Vec<CommitId>,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
}

impl CommitInfo {
    /// create CommitInfo from a git2::Commit
    ///
    /// a message or signature that isn't UTF-8 is a `DecodeFailure`, and a
    /// timestamp chrono can't represent marks the commit as corrupt
    pub(crate) fn from_git2(commit: &git2::Commit<'_>) -> StorageResult<Self> {
        let id = CommitId::new(commit.id());
        let author = commit.author();
        let time = commit.time();
        let timestamp = Utc
            .timestamp_opt(time.seconds(), 0)
            .single()
            .ok_or_else(|| StorageError::CorruptedObject {
                oid: id.to_string(),
                reason: format!("timestamp {} out of range", time.seconds()),
            })?;

        Ok(Self {
            id,
            tree_id: TreeId::new(commit.tree_id()),
            parent_ids: commit.parent_ids().map(CommitId::new).collect(),
            message: utf8(commit.message_bytes(), || format!("message of commit {}", id))?,
            author_name: utf8(author.name_bytes(), || format!("author of commit {}", id))?,
            author_email: utf8(author.email_bytes(), || format!("author email of commit {}", id))?,
            timestamp,
        })
    }

    /// the root commit has no parent
    pub fn is_root(&self) -> bool {
        self.parent_ids.is_empty()
    }

    /// get the first (or only) parent
    pub fn first_parent(&self) -> Option<CommitId> {
        self.parent_ids.first().copied()
    }

    /// get a short summary of the commit (first line of message)
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or(&self.message)
    }
}

fn utf8(bytes: &[u8], what: impl FnOnce() -> String) -> StorageResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|source| StorageError::DecodeFailure {
            what: what(),
            source,
        })
}

/// builder for creating commits with a fluent interface
pub struct CommitBuilder<'a> {
    repo: &'a Repository,
    tree_id: Option<TreeId>,
    parent: Option<CommitId>,
    message: String,
    signature: GitSignature,
}

impl<'a> CommitBuilder<'a> {
    /// create a new CommitBuilder
    pub fn new(repo: &'a Repository) -> Self {
        Self {
            repo,
            tree_id: None,
            parent: None,
            message: String::new(),
            signature: GitSignature::anonymous(),
        }
    }

    /// set the tree for this commit
    pub fn tree(mut self, tree_id: TreeId) -> Self {
        self.tree_id = Some(tree_id);
        self
    }

    /// set the parent commit; None makes a root commit
    pub fn parent(mut self, parent: Option<CommitId>) -> Self {
        self.parent = parent;
        self
    }

    /// set the commit message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// set the author/committer signature
    pub fn signature(mut self, signature: GitSignature) -> Self {
        self.signature = signature;
        self
    }

    /// create the commit object and return its ID
    ///
    /// no ref is touched; moving head is a separate compare-and-set
    pub fn commit(self) -> StorageResult<CommitId> {
        let tree_id = self
            .tree_id
            .ok_or_else(|| StorageError::Internal("commit requires a tree".to_string()))?;

        let tree = self.repo.find_tree(tree_id.raw())?;
        let sig = self.signature.to_git2_signature()?;

        let parent_commit = self
            .parent
            .map(|id| {
                self.repo
                    .find_commit(id.raw())
                    .map_err(|_| StorageError::CommitNotFound(id))
            })
            .transpose()?;
        let parents: Vec<&git2::Commit<'_>> = parent_commit.iter().collect();

        let message = CommitMessage::normalize(&self.message, CommitMessage::PLACEHOLDER);
        let oid = self
            .repo
            .commit(None, &sig, &sig, &message, &tree, &parents)?;

        Ok(CommitId::new(oid))
    }
}

/// get information about a commit
pub fn get_commit(repo: &Repository, id: CommitId) -> StorageResult<CommitInfo> {
    let commit = repo
        .find_commit(id.raw())
        .map_err(|_| StorageError::CommitNotFound(id))?;

    CommitInfo::from_git2(&commit)
}

/// iterate over commit history starting from a commit
pub struct HistoryIterator<'repo> {
    repo: &'repo Repository,
    revwalk: Revwalk<'repo>,
}

impl<'repo> HistoryIterator<'repo> {
    /// create a new history iterator
    ///
    /// follows first parents only: the store never creates merge commits,
    /// but one imported from elsewhere must not fork the walk
    pub fn new(repo: &'repo Repository, start: CommitId) -> StorageResult<Self> {
        let mut revwalk = repo.revwalk()?;
        revwalk.push(start.raw())?;
        revwalk.set_sorting(Sort::TOPOLOGICAL)?;
        revwalk.simplify_first_parent()?;

        Ok(Self { repo, revwalk })
    }

    /// an iterator that yields nothing (history of an empty store)
    pub fn empty(repo: &'repo Repository) -> StorageResult<Self> {
        Ok(Self {
            repo,
            revwalk: repo.revwalk()?,
        })
    }
}

impl<'repo> Iterator for HistoryIterator<'repo> {
    type Item = StorageResult<CommitInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.revwalk.next()? {
            Ok(oid) => match self.repo.find_commit(oid) {
                Ok(commit) => Some(CommitInfo::from_git2(&commit)),
                Err(e) => Some(Err(StorageError::Git(e))),
            },
            Err(e) => Some(Err(StorageError::Git(e))),
        }
    }
}

/// One revision of a page: a commit that changed what is stored at a path.
#[derive(Debug, Clone, Serialize)]
pub struct PathRevision {
    pub commit: CommitId,
    pub author_name: String,
    pub author_email: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// what the path held in that commit; None if the commit removed it
    pub object: Option<ObjectRef>,
}

/// Lazily walks history, yielding only commits that changed one path.
///
/// Each step compares the path in a commit's tree against its parent's.
/// The root commit has nothing to compare against and is never yielded.
pub struct PathHistory<'repo> {
    repo: &'repo Repository,
    commits: HistoryIterator<'repo>,
    path: PagePath,
}

impl<'repo> PathHistory<'repo> {
    pub fn new(commits: HistoryIterator<'repo>, path: PagePath) -> Self {
        Self {
            repo: commits.repo,
            commits,
            path,
        }
    }

    fn examine(&self, info: CommitInfo) -> StorageResult<Option<PathRevision>> {
        let parent = match info.first_parent() {
            Some(parent) => parent,
            None => return Ok(None),
        };

        let here = try_resolve(self.repo, info.tree_id, &self.path)?;
        let parent_tree = get_commit(self.repo, parent)?.tree_id;
        let before = try_resolve(self.repo, parent_tree, &self.path)?;

        if here == before {
            return Ok(None);
        }

        Ok(Some(PathRevision {
            commit: info.id,
            author_name: info.author_name,
            author_email: info.author_email,
            message: info.message,
            timestamp: info.timestamp,
            object: here,
        }))
    }
}

impl<'repo> Iterator for PathHistory<'repo> {
    type Item = StorageResult<PathRevision>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let info = match self.commits.next()? {
                Ok(info) => info,
                Err(e) => return Some(Err(e)),
            };
            match self.examine(info) {
                Ok(Some(revision)) => return Some(Ok(revision)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// message formatting for page commits
pub struct CommitMessage;

impl CommitMessage {
    /// used when an editor leaves the message empty
    pub const PLACEHOLDER: &'static str = "no commit message!!";

    /// a commit message is never empty
    pub fn normalize(message: &str, placeholder: &str) -> String {
        if message.trim().is_empty() {
            placeholder.to_string()
        } else {
            message.to_string()
        }
    }

    /// message for a merged edit
    pub fn merged(message: &str, path: &PagePath) -> String {
        format!("{} (merged with concurrent edit of {})", message, path)
    }
}
