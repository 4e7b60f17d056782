//! Full-tree scans: keyword search and page lookup by name.
//!
//! No index is kept. Every call walks the whole snapshot and, for search,
//! decodes every blob, so cost grows with the total size of stored pages.
//! The walk is lazy: a caller that stops pulling stops the scan.

use git2::Repository;
use tracing::debug;

use crate::storage::blob::{self, BlobId};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::tree::get_tree;
use crate::storage::types::{ObjectRef, PagePath, TreeId};

/// Depth-first, name-ordered walk over every blob below a tree.
pub struct BlobWalk<'repo> {
    repo: &'repo Repository,
    /// directories still to expand
    pending: Vec<(PagePath, TreeId)>,
    /// blobs of the directory being emitted, reversed so `pop` is in order
    ready: Vec<(PagePath, BlobId)>,
}

impl<'repo> BlobWalk<'repo> {
    pub fn new(repo: &'repo Repository, root: TreeId) -> Self {
        Self {
            repo,
            pending: vec![(PagePath::root(), root)],
            ready: Vec::new(),
        }
    }

    fn expand(&mut self, dir: PagePath, tree_id: TreeId) -> StorageResult<()> {
        let mut blobs = Vec::new();
        let mut subdirs = Vec::new();

        for entry in get_tree(self.repo, tree_id)? {
            let path = dir.join(&entry.name).map_err(|e| StorageError::CorruptedObject {
                oid: tree_id.to_string(),
                reason: format!("entry {:?} is not a valid path: {}", entry.name, e),
            })?;
            match entry.object {
                ObjectRef::Blob(id) => blobs.push((path, id)),
                ObjectRef::Tree(id) => subdirs.push((path, id)),
            }
        }

        // files of a directory come before its subdirectories
        blobs.reverse();
        self.ready = blobs;
        subdirs.reverse();
        self.pending.extend(subdirs);
        Ok(())
    }
}

impl<'repo> Iterator for BlobWalk<'repo> {
    type Item = StorageResult<(PagePath, BlobId)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.ready.pop() {
                return Some(Ok(item));
            }
            let (dir, tree_id) = self.pending.pop()?;
            if let Err(e) = self.expand(dir, tree_id) {
                self.pending.clear();
                return Some(Err(e));
            }
        }
    }
}

/// Lazily yields the paths of pages whose text contains a keyword.
pub struct SearchIter<'repo> {
    walk: BlobWalk<'repo>,
    keyword: String,
}

impl<'repo> Iterator for SearchIter<'repo> {
    type Item = StorageResult<PagePath>;

    fn next(&mut self) -> Option<Self::Item> {
        let repo = self.walk.repo;
        for item in self.walk.by_ref() {
            let (path, id) = match item {
                Ok(found) => found,
                Err(e) => return Some(Err(e)),
            };
            match blob::get_text(repo, id) {
                Ok(text) if text.contains(&self.keyword) => return Some(Ok(path)),
                Ok(_) => {}
                Err(StorageError::DecodeFailure { .. }) => {
                    debug!(path = %path, "skipping binary page in search");
                }
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

/// search every page below `root` for `keyword`
pub fn search<'repo>(repo: &'repo Repository, root: TreeId, keyword: &str) -> SearchIter<'repo> {
    SearchIter {
        walk: BlobWalk::new(repo, root),
        keyword: keyword.to_string(),
    }
}

/// find the first page whose file name, minus `extension`, is `basename`
pub fn find_page(
    repo: &Repository,
    root: TreeId,
    basename: &str,
    extension: &str,
) -> StorageResult<Option<PagePath>> {
    let wanted = format!("{}.{}", basename, extension);
    for item in BlobWalk::new(repo, root) {
        let (path, _) = item?;
        if path.file_name() == Some(wanted.as_str()) {
            return Ok(Some(path));
        }
    }
    Ok(None)
}
