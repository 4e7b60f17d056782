//! Wiki API - the handle an HTTP layer drives.
//!
//! Every call runs in its own transaction over the head at the moment of the
//! call. Reads roll their transaction back; edits go through the
//! transaction manager's write-or-merge flow and notify the commit hooks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

use crate::storage::{
    decode_text, BlobId, CommitId, CommitInfo, CommitMessage, GitRepository, GitSignature,
    InvalidPathError, ObjectRef, PagePath, PathRevision, RepositoryStats, StorageError, TreeEntry,
};
use crate::text::{merge, BlobDiff, MergeOutcome};
use crate::transaction::{
    EditOutcome, Transaction, TransactionError, TransactionManager, TransactionResult, TxActive,
};
use crate::wiki::config::{ConfigError, WikiConfig};
use crate::wiki::hooks::{CommitEvent, CommitHook};

/// Result type for wiki operations.
pub type WikiResult<T> = Result<T, WikiError>;

/// Wiki errors.
#[derive(Debug, Error)]
pub enum WikiError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("page store not found: {0}")]
    NotFound(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<InvalidPathError> for WikiError {
    fn from(e: InvalidPathError) -> Self {
        WikiError::Storage(StorageError::InvalidPath(e))
    }
}

impl WikiError {
    /// The storage failure underneath, however it was wrapped.
    pub fn storage(&self) -> Option<&StorageError> {
        match self {
            WikiError::Storage(e) => Some(e),
            WikiError::Transaction(e) => e.storage(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.storage().is_some_and(StorageError::is_not_found)
    }

    /// A head race that outlasted every retry.
    pub fn is_conflict(&self) -> bool {
        self.storage().is_some_and(StorageError::is_conflict)
    }

    /// The request was at fault: missing page, blocked path, bad path.
    /// Anything else is a server fault.
    pub fn is_client_error(&self) -> bool {
        match self.storage() {
            Some(e) => {
                e.is_not_found()
                    || matches!(
                        e,
                        StorageError::TypeMismatch { .. } | StorageError::InvalidPath(_)
                    )
            }
            None => false,
        }
    }
}

/// The main wiki handle.
pub struct Wiki {
    config: WikiConfig,
    manager: TransactionManager,
    hooks: Vec<Arc<dyn CommitHook>>,
    /// keeps an in-memory store alive
    _temp: Option<TempDir>,
}

impl Wiki {
    /// Open or create a wiki at the given path.
    pub fn open(path: impl AsRef<Path>) -> WikiResult<Self> {
        Self::open_with_config(WikiConfig::new(path.as_ref()))
    }

    /// Open or create a wiki with custom configuration.
    pub fn open_with_config(config: WikiConfig) -> WikiResult<Self> {
        config.validate()?;

        let repo = if config.create_if_missing {
            GitRepository::open_or_init(&config.path)?
        } else if config.path.exists() {
            GitRepository::open(&config.path)?
        } else {
            return Err(WikiError::NotFound(config.path.clone()));
        };

        let manager = TransactionManager::with_max_retries(repo, config.max_commit_retries);
        Ok(Self {
            config,
            manager,
            hooks: Vec::new(),
            _temp: None,
        })
    }

    /// Create a wiki in a temporary directory that lives as long as it does.
    pub fn in_memory() -> WikiResult<Self> {
        let dir = TempDir::new()?;
        let mut wiki = Self::open_with_config(WikiConfig::new(dir.path()))?;
        wiki._temp = Some(dir);
        Ok(wiki)
    }

    /// Register a hook called after every committed edit.
    pub fn with_hook(mut self, hook: impl CommitHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn add_hook(&mut self, hook: Arc<dyn CommitHook>) {
        self.hooks.push(hook);
    }

    /// Get the page store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Get the configuration.
    pub fn config(&self) -> &WikiConfig {
        &self.config
    }

    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    // ==================== Naming ====================

    /// Signature for an author name, falling back to the default author.
    pub fn signature_for(&self, author: Option<&str>) -> GitSignature {
        let name: String = author
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(self.config.default_author.as_str())
            .chars()
            .filter(|c| !matches!(c, '<' | '>') && !c.is_control())
            .collect();
        let name = if name.trim().is_empty() {
            self.config.default_author.clone()
        } else {
            name
        };

        let local: String = name
            .chars()
            .map(|c| if c.is_whitespace() || c == '@' { '.' } else { c })
            .collect();
        let email = format!("{}@{}", local, self.config.email_domain);
        GitSignature::new(name, email)
    }

    /// Parse a path as given by a client.
    pub fn parse_path(&self, path: &str) -> WikiResult<PagePath> {
        Ok(PagePath::parse(path)?)
    }

    /// Storage path of a page name: `wiki/home` is stored at `wiki/home.md`.
    pub fn page_path(&self, name: &str) -> WikiResult<PagePath> {
        let path = PagePath::parse(name)?;
        let file = path.file_name().ok_or(InvalidPathError::EmptySegment)?;
        let suffix = format!(".{}", self.config.page_extension);
        if file.ends_with(&suffix) {
            return Ok(path);
        }
        Ok(path.parent().join(&format!("{}{}", file, suffix))?)
    }

    // ==================== Reads ====================

    /// Run `f` against a fresh snapshot and discard the transaction.
    fn read_tx<T, F>(&self, f: F) -> WikiResult<T>
    where
        F: FnOnce(&Transaction<TxActive>) -> TransactionResult<T>,
    {
        let tx = self.manager.begin()?;
        let result = f(&tx);
        self.manager.rollback_transaction(tx);
        Ok(result?)
    }

    /// Current head commit; `None` before the first edit.
    pub fn head(&self) -> WikiResult<Option<CommitId>> {
        Ok(self.manager.head()?)
    }

    pub fn resolve(&self, path: &PagePath) -> WikiResult<ObjectRef> {
        self.read_tx(|tx| tx.resolve(path))
    }

    pub fn exists(&self, path: &PagePath) -> WikiResult<bool> {
        self.read_tx(|tx| tx.exists(path))
    }

    pub fn is_dir(&self, path: &PagePath) -> WikiResult<bool> {
        self.read_tx(|tx| tx.is_dir(path))
    }

    pub fn is_file(&self, path: &PagePath) -> WikiResult<bool> {
        self.read_tx(|tx| tx.is_file(path))
    }

    pub fn can_create(&self, path: &PagePath) -> WikiResult<bool> {
        self.read_tx(|tx| tx.can_create(path))
    }

    /// The blob id an edit form carries as its base.
    pub fn blob_id(&self, path: &PagePath) -> WikiResult<Option<BlobId>> {
        self.read_tx(|tx| tx.blob_id(path))
    }

    pub fn read(&self, path: &PagePath) -> WikiResult<Vec<u8>> {
        self.read_tx(|tx| tx.read(path))
    }

    pub fn read_text(&self, path: &PagePath) -> WikiResult<String> {
        self.read_tx(|tx| tx.read_text(path))
    }

    /// Read a page together with the blob id to edit it from.
    pub fn read_for_edit(&self, path: &PagePath) -> WikiResult<(String, Option<BlobId>)> {
        self.read_tx(|tx| match tx.blob_id(path)? {
            Some(id) => Ok((tx.read_text(path)?, Some(id))),
            None => Ok((String::new(), None)),
        })
    }

    /// Read a revision directly by blob id.
    pub fn read_revision(&self, id: BlobId) -> WikiResult<Vec<u8>> {
        Ok(self.manager.repo().get_blob(id)?)
    }

    pub fn read_revision_text(&self, id: BlobId) -> WikiResult<String> {
        let bytes = self.read_revision(id)?;
        Ok(decode_text(bytes, &id.to_string())?)
    }

    /// Entries of a directory, sorted by name.
    pub fn list(&self, dir: &PagePath) -> WikiResult<Vec<TreeEntry>> {
        self.read_tx(|tx| tx.list(dir))
    }

    /// Path of the first page named `basename` anywhere in the wiki.
    pub fn find_page(&self, basename: &str) -> WikiResult<Option<PagePath>> {
        self.read_tx(|tx| tx.find_page(basename, &self.config.page_extension))
    }

    /// Pages containing `keyword`; `limit` stops the scan early.
    pub fn search(&self, keyword: &str, limit: Option<usize>) -> WikiResult<Vec<PagePath>> {
        self.read_tx(|tx| tx.search(keyword, limit))
    }

    /// Revisions of a page, newest first.
    pub fn history(&self, path: &PagePath, limit: Option<usize>) -> WikiResult<Vec<PathRevision>> {
        self.read_tx(|tx| tx.history(path, limit))
    }

    /// Every commit, newest first.
    pub fn log(&self, limit: Option<usize>) -> WikiResult<Vec<CommitInfo>> {
        Ok(self.manager.repo().history(None, limit)?)
    }

    /// Line diff between two revisions; `None` if either is not a stored page.
    pub fn diff(&self, old: BlobId, new: BlobId) -> WikiResult<Option<BlobDiff>> {
        Ok(self.manager.repo().diff(old, new)?)
    }

    /// Three-way merge of page texts.
    pub fn merge(&self, base: &str, mine: &str, theirs: &str) -> MergeOutcome {
        merge(base, mine, theirs)
    }

    /// Get wiki statistics.
    pub fn stats(&self) -> WikiResult<RepositoryStats> {
        Ok(self.manager.repo().stats(None)?)
    }

    // ==================== Writes ====================

    /// Submit an edit of `path` made from `base`.
    ///
    /// Returns whether the content was committed as is, merged with a
    /// concurrent edit, or conflicts and must be resolved by the editor.
    pub fn edit(
        &self,
        path: &PagePath,
        base: Option<BlobId>,
        content: &[u8],
        author: Option<&str>,
        message: &str,
    ) -> WikiResult<EditOutcome> {
        let signature = self.signature_for(author);
        let message = CommitMessage::normalize(message, &self.config.empty_message);

        let outcome = self
            .manager
            .submit_edit(path, base, content, &signature, &message)?;

        match &outcome {
            EditOutcome::Committed { commit } | EditOutcome::Merged { commit } => {
                self.notify(&CommitEvent {
                    commit: *commit,
                    path: path.clone(),
                    author: signature.name.clone(),
                    email: signature.email.clone(),
                    message,
                    merged: matches!(outcome, EditOutcome::Merged { .. }),
                });
            }
            EditOutcome::Conflict { conflicts, .. } => {
                debug!(path = %path, conflicts, "edit handed back for resolution");
            }
        }
        Ok(outcome)
    }

    /// Begin a transaction for several writes committed together.
    pub fn begin(&self) -> WikiResult<Transaction<TxActive>> {
        Ok(self.manager.begin()?)
    }

    /// Commit a transaction begun with [`Wiki::begin`].
    pub fn commit(
        &self,
        tx: Transaction<TxActive>,
        author: Option<&str>,
        message: &str,
    ) -> WikiResult<CommitId> {
        let signature = self.signature_for(author);
        let message = CommitMessage::normalize(message, &self.config.empty_message);
        let written = tx.written_paths().to_vec();

        let commit = self.manager.commit_transaction(tx, &signature, &message)?;
        for path in written {
            self.notify(&CommitEvent {
                commit,
                path,
                author: signature.name.clone(),
                email: signature.email.clone(),
                message: message.clone(),
                merged: false,
            });
        }
        Ok(commit)
    }

    pub fn rollback(&self, tx: Transaction<TxActive>) {
        self.manager.rollback_transaction(tx);
    }

    fn notify(&self, event: &CommitEvent) {
        for hook in &self.hooks {
            hook.on_commit(event);
        }
    }
}

impl std::fmt::Debug for Wiki {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wiki")
            .field("path", &self.config.path)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::hash_blob;
    use crate::text::MARKER_CURRENT;
    use crate::wiki::hooks::LogHook;
    use parking_lot::Mutex;

    fn path(s: &str) -> PagePath {
        PagePath::parse(s).unwrap()
    }

    fn recording_wiki() -> (Wiki, Arc<Mutex<Vec<CommitEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let wiki = Wiki::in_memory()
            .unwrap()
            .with_hook(LogHook)
            .with_hook(move |e: &CommitEvent| sink.lock().push(e.clone()));
        (wiki, events)
    }

    #[test]
    fn test_open_empty_wiki() {
        let wiki = Wiki::in_memory().unwrap();
        assert_eq!(wiki.head().unwrap(), None);
        assert!(wiki.list(&PagePath::root()).unwrap().is_empty());
        assert!(wiki.log(None).unwrap().is_empty());
        assert_eq!(wiki.stats().unwrap().page_count, 0);
    }

    #[test]
    fn test_open_missing_without_create() {
        let dir = TempDir::new().unwrap();
        let config = WikiConfig::new(dir.path().join("missing")).create_if_missing(false);
        assert!(matches!(
            Wiki::open_with_config(config),
            Err(WikiError::NotFound(_))
        ));
    }

    #[test]
    fn test_reopen_keeps_pages() {
        let dir = TempDir::new().unwrap();
        {
            let wiki = Wiki::open(dir.path()).unwrap();
            wiki.edit(&path("a.md"), None, b"a", None, "a").unwrap();
        }
        let wiki = Wiki::open(dir.path()).unwrap();
        assert_eq!(wiki.read_text(&path("a.md")).unwrap(), "a");
    }

    #[test]
    fn test_signature_fallbacks() {
        let wiki = Wiki::in_memory().unwrap();

        let anon = wiki.signature_for(None);
        assert_eq!(anon.name, "anonymous");
        assert_eq!(anon.email, "anonymous@localhost");

        assert_eq!(wiki.signature_for(Some("  ")).name, "anonymous");

        let named = wiki.signature_for(Some("Ada Lovelace"));
        assert_eq!(named.name, "Ada Lovelace");
        assert_eq!(named.email, "Ada.Lovelace@localhost");

        assert_eq!(wiki.signature_for(Some("<evil>")).name, "evil");
    }

    #[test]
    fn test_page_path() {
        let wiki = Wiki::in_memory().unwrap();
        assert_eq!(wiki.page_path("wiki/home").unwrap(), path("wiki/home.md"));
        assert_eq!(wiki.page_path("/wiki/home.md").unwrap(), path("wiki/home.md"));
        assert!(wiki.page_path("").is_err());
        assert!(wiki.page_path("../etc/passwd").unwrap_err().is_client_error());
    }

    #[test]
    fn test_end_to_end_scenario() {
        let (wiki, events) = recording_wiki();
        let home = path("wiki/home.md");

        // empty store, first edit
        let first = wiki.edit(&home, None, b"# Home\n\nWelcome.\n", Some("alice"), "init").unwrap();
        assert!(matches!(first, EditOutcome::Committed { .. }));
        assert_eq!(wiki.read_text(&home).unwrap(), "# Home\n\nWelcome.\n");
        let base = wiki.blob_id(&home).unwrap();

        // another editor appends a line
        let concurrent = wiki
            .edit(&home, base, b"# Home\n\nWelcome.\n\nOld\n", Some("bob"), "append")
            .unwrap();
        assert!(matches!(concurrent, EditOutcome::Committed { .. }));

        // a stale edit of an unrelated line merges
        let merged = wiki
            .edit(&home, base, b"# Home Page\n\nWelcome.\n", Some("alice"), "retitle")
            .unwrap();
        assert!(matches!(merged, EditOutcome::Merged { .. }));
        assert_eq!(
            wiki.read_text(&home).unwrap(),
            "# Home Page\n\nWelcome.\n\nOld\n"
        );

        // a stale edit of the same line conflicts and commits nothing
        let head = wiki.head().unwrap();
        let conflict = wiki
            .edit(&home, base, b"# Home\n\nWelcome.\n\nNew\n", Some("carol"), "append too")
            .unwrap();
        match conflict {
            EditOutcome::Conflict { text, current, .. } => {
                assert!(text.contains(MARKER_CURRENT));
                assert!(text.contains("Old") && text.contains("New"));
                assert_eq!(current, wiki.blob_id(&home).unwrap());
            }
            other => panic!("expected a conflict, got {:?}", other),
        }
        assert_eq!(wiki.head().unwrap(), head);

        // hooks saw exactly the three commits
        let events = events.lock();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].author, "alice");
        assert_eq!(events[1].author, "bob");
        assert!(events[2].merged);

        // history skips the root commit
        let history = wiki.history(&home, None).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].author_name, "alice");
        assert_eq!(history[1].message, "append");
    }

    #[test]
    fn test_multi_page_commit_notifies_each_path_once() {
        let (wiki, events) = recording_wiki();
        let mut tx = wiki.begin().unwrap();
        tx.write(&path("a.md"), b"draft").unwrap();
        tx.write(&path("b.md"), b"b").unwrap();
        tx.write(&path("a.md"), b"a").unwrap();
        let commit = wiki.commit(tx, Some("alice"), "two pages").unwrap();

        let events = events.lock();
        let paths: Vec<_> = events.iter().map(|e| e.path.clone()).collect();
        assert_eq!(paths, vec![path("a.md"), path("b.md")]);
        assert!(events.iter().all(|e| e.commit == commit && !e.merged));
    }

    #[test]
    fn test_empty_message_placeholder() {
        let wiki = Wiki::in_memory().unwrap();
        let outcome = wiki.edit(&path("a.md"), None, b"a", None, "   ").unwrap();
        let info = wiki.manager().repo().get_commit(outcome.commit().unwrap()).unwrap();
        assert_eq!(info.message, "no commit message!!");
    }

    #[test]
    fn test_read_for_edit_and_revisions() {
        let wiki = Wiki::in_memory().unwrap();
        let p = path("notes.md");

        assert_eq!(wiki.read_for_edit(&p).unwrap(), (String::new(), None));

        wiki.edit(&p, None, b"v1\n", None, "v1").unwrap();
        let (text, base) = wiki.read_for_edit(&p).unwrap();
        assert_eq!(text, "v1\n");
        wiki.edit(&p, base, b"v2\n", None, "v2").unwrap();

        let old = base.unwrap();
        assert_eq!(wiki.read_revision_text(old).unwrap(), "v1\n");

        let new = wiki.blob_id(&p).unwrap().unwrap();
        let diff = wiki.diff(old, new).unwrap().unwrap();
        assert_eq!(diff.to_unified(), "@@ -1,1 +1,1 @@\n-v1\n+v2\n");
    }

    #[test]
    fn test_browse_and_find() {
        let wiki = Wiki::in_memory().unwrap();
        let mut tx = wiki.begin().unwrap();
        tx.write(&path("home.md"), b"welcome home").unwrap();
        tx.write(&path("docs/guide.md"), b"how to say hello").unwrap();
        tx.write(&path("docs/logo.png"), &[0x89, 0x50, 0xff, 0x00]).unwrap();
        wiki.commit(tx, Some("alice"), "seed").unwrap();

        let names: Vec<_> = wiki
            .list(&path("docs"))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["guide.md", "logo.png"]);

        assert!(wiki.is_dir(&path("docs")).unwrap());
        assert!(wiki.is_file(&path("home.md")).unwrap());
        assert!(wiki.can_create(&path("docs/new.md")).unwrap());
        assert!(!wiki.can_create(&path("home.md/child.md")).unwrap());

        assert_eq!(wiki.find_page("guide").unwrap(), Some(path("docs/guide.md")));
        assert_eq!(wiki.find_page("logo").unwrap(), None);

        assert_eq!(wiki.search("hello", None).unwrap(), vec![path("docs/guide.md")]);
        assert_eq!(wiki.search("o", None).unwrap().len(), 2);

        // binary pages read as bytes but not as text
        assert_eq!(wiki.read(&path("docs/logo.png")).unwrap().len(), 4);
        assert!(wiki.read_text(&path("docs/logo.png")).is_err());

        let stats = wiki.stats().unwrap();
        assert_eq!(stats.page_count, 3);
        assert_eq!(stats.dir_count, 1);
        assert_eq!(stats.commit_count, 1);
    }

    #[test]
    fn test_error_classification() {
        let wiki = Wiki::in_memory().unwrap();
        wiki.edit(&path("a"), None, b"file", None, "a").unwrap();

        let missing = wiki.read(&path("nope.md")).unwrap_err();
        assert!(missing.is_not_found() && missing.is_client_error());

        let blocked = wiki.edit(&path("a/b.md"), None, b"x", None, "x").unwrap_err();
        assert!(blocked.is_client_error());
        assert!(!blocked.is_not_found());

        let unknown = hash_blob(b"never stored").unwrap();
        assert!(wiki.read_revision(unknown).unwrap_err().is_not_found());
        assert!(wiki.diff(unknown, unknown).unwrap().is_none());
    }

    #[test]
    fn test_merge_passthrough() {
        let wiki = Wiki::in_memory().unwrap();
        let outcome = wiki.merge("foo\n", "foo\n", "foo\nbar\n");
        assert!(outcome.is_clean());
        assert_eq!(outcome.text, "foo\nbar\n");
    }
}
