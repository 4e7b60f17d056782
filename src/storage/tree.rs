//! Tree operations: path resolution and copy-on-write rewriting.
//!
//! In Git, a tree is a directory. A page store snapshot is one root tree;
//! pages are blobs at arbitrary depth below it.
//!
//! Reads walk a [`PagePath`] one segment at a time so that a file standing
//! where a directory is expected is reported as such instead of as "missing".
//! Writes rebuild only the chain of trees from the root down to the written
//! blob; every sibling keeps its id and is shared with the previous snapshot.

use git2::{Repository, Tree};
use tracing::debug;

use crate::storage::blob::{self, BlobId};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{ObjectKind, ObjectRef, PagePath, TreeEntry, TreeId};

/// look up a tree, telling "missing" apart from "not a tree"
pub(crate) fn find_tree(repo: &Repository, tree_id: TreeId) -> StorageResult<Tree<'_>> {
    let object = match repo.find_object(tree_id.raw(), None) {
        Ok(object) => object,
        Err(e) if e.code() == git2::ErrorCode::NotFound => {
            return Err(StorageError::ObjectNotFound(tree_id.to_string()));
        }
        Err(e) => return Err(StorageError::Git(e)),
    };

    let kind = object.kind();
    object.into_tree().map_err(|_| StorageError::CorruptedObject {
        oid: tree_id.to_string(),
        reason: format!("expected tree, found {:?}", kind),
    })
}

fn classify(entry: &git2::TreeEntry<'_>, tree_id: TreeId) -> StorageResult<ObjectRef> {
    ObjectRef::from_entry(entry).ok_or_else(|| StorageError::CorruptedObject {
        oid: tree_id.to_string(),
        reason: format!(
            "unsupported entry {:?} of kind {:?}",
            entry.name().unwrap_or("<non-utf8>"),
            entry.kind()
        ),
    })
}

/// write the empty tree (the root of a store with no commits)
pub fn empty_tree(repo: &Repository) -> StorageResult<TreeId> {
    let oid = repo.treebuilder(None)?.write()?;
    Ok(TreeId::new(oid))
}

/// store a directory snapshot from its entries
///
/// git orders the entries canonically, so the id depends only on the set of
/// entries, not on the order they were given in
pub fn put_tree(repo: &Repository, entries: &[TreeEntry]) -> StorageResult<TreeId> {
    let mut builder = repo.treebuilder(None)?;
    for entry in entries {
        if entry.name.is_empty() || entry.name.contains('/') || entry.name.contains('\0') {
            return Err(StorageError::Internal(format!(
                "invalid tree entry name {:?}",
                entry.name
            )));
        }
        if builder.get(entry.name.as_str())?.is_some() {
            return Err(StorageError::Internal(format!(
                "duplicate tree entry name {:?}",
                entry.name
            )));
        }
        builder.insert(entry.name.as_str(), entry.object.raw(), entry.file_mode())?;
    }
    let oid = builder.write()?;
    Ok(TreeId::new(oid))
}

/// read a directory snapshot, entries sorted by name bytes
///
/// git's own order sorts a directory `a` as `a/`, after `a.md`
pub fn get_tree(repo: &Repository, tree_id: TreeId) -> StorageResult<Vec<TreeEntry>> {
    let tree = find_tree(repo, tree_id)?;
    let mut entries = tree
        .iter()
        .map(|entry| {
            let name = entry.name().ok_or_else(|| StorageError::CorruptedObject {
                oid: tree_id.to_string(),
                reason: "entry name is not valid UTF-8".to_string(),
            })?;
            Ok(TreeEntry::new(name, classify(&entry, tree_id)?))
        })
        .collect::<StorageResult<Vec<_>>>()?;
    entries.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
    Ok(entries)
}

/// walk `path` from `root`, returning the object it names
///
/// the root path resolves to `root` itself
pub fn resolve(repo: &Repository, root: TreeId, path: &PagePath) -> StorageResult<ObjectRef> {
    let mut current = ObjectRef::Tree(root);

    for (depth, name) in path.segments().iter().enumerate() {
        let tree_id = match current {
            ObjectRef::Tree(id) => id,
            ObjectRef::Blob(_) => {
                return Err(StorageError::TypeMismatch {
                    path: path.prefix(depth),
                    expected: ObjectKind::Tree,
                    found: ObjectKind::Blob,
                });
            }
        };

        let tree = find_tree(repo, tree_id)?;
        let entry = tree
            .get_name(name)
            .ok_or_else(|| StorageError::PathNotFound(path.clone()))?;
        current = classify(&entry, tree_id)?;
    }

    Ok(current)
}

/// like [`resolve`], but "not there" (missing, or blocked by a file) is `None`
pub fn try_resolve(
    repo: &Repository,
    root: TreeId,
    path: &PagePath,
) -> StorageResult<Option<ObjectRef>> {
    match resolve(repo, root, path) {
        Ok(object) => Ok(Some(object)),
        Err(StorageError::PathNotFound(_)) | Err(StorageError::TypeMismatch { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// whether a page may be created or overwritten at `path`
///
/// false as soon as a proper prefix of the path is a file; true if the
/// remaining path is free or the path itself is a file. A directory (and
/// the root) can't be replaced by a page.
pub fn can_create(repo: &Repository, root: TreeId, path: &PagePath) -> StorageResult<bool> {
    let mut current = ObjectRef::Tree(root);

    for name in path.segments() {
        let tree_id = match current {
            ObjectRef::Tree(id) => id,
            ObjectRef::Blob(_) => return Ok(false),
        };
        let tree = find_tree(repo, tree_id)?;
        current = match tree.get_name(name) {
            Some(entry) => classify(&entry, tree_id)?,
            None => return Ok(true),
        };
    }

    Ok(current.kind() == ObjectKind::Blob)
}

/// store `content` at `path` below `root`, returning the new root tree
///
/// Only the trees on the root-to-leaf chain are rewritten. Missing
/// directories are created; a file on the way down or a directory at the
/// leaf is a [`StorageError::TypeMismatch`].
pub fn write_path(
    repo: &Repository,
    root: TreeId,
    path: &PagePath,
    content: &[u8],
) -> StorageResult<TreeId> {
    if path.is_root() {
        return Err(StorageError::TypeMismatch {
            path: path.clone(),
            expected: ObjectKind::Blob,
            found: ObjectKind::Tree,
        });
    }

    let blob_id = blob::put_blob(repo, content)?;
    let new_root = insert_blob(repo, Some(root), path, 0, blob_id)?;
    debug!(path = %path, blob = %blob_id.short(), root = %new_root, "tree rewritten");
    Ok(new_root)
}

/// recursion depth is bounded by `PagePath::MAX_DEPTH`
fn insert_blob(
    repo: &Repository,
    tree_id: Option<TreeId>,
    path: &PagePath,
    depth: usize,
    blob_id: BlobId,
) -> StorageResult<TreeId> {
    let tree = tree_id.map(|id| find_tree(repo, id)).transpose()?;
    let mut builder = repo.treebuilder(tree.as_ref())?;
    let name = path.segments()[depth].as_str();

    let existing = match (builder.get(name)?, tree_id) {
        (Some(entry), Some(id)) => Some(classify(&entry, id)?),
        _ => None,
    };

    if depth + 1 == path.depth() {
        if let Some(ObjectRef::Tree(_)) = existing {
            return Err(StorageError::TypeMismatch {
                path: path.clone(),
                expected: ObjectKind::Blob,
                found: ObjectKind::Tree,
            });
        }
        builder.insert(name, blob_id.raw(), ObjectKind::Blob.file_mode())?;
    } else {
        let subtree = match existing {
            Some(ObjectRef::Tree(id)) => Some(id),
            Some(ObjectRef::Blob(_)) => {
                return Err(StorageError::TypeMismatch {
                    path: path.prefix(depth + 1),
                    expected: ObjectKind::Tree,
                    found: ObjectKind::Blob,
                });
            }
            None => None,
        };
        let new_subtree = insert_blob(repo, subtree, path, depth + 1, blob_id)?;
        builder.insert(name, new_subtree.raw(), ObjectKind::Tree.file_mode())?;
    }

    Ok(TreeId::new(builder.write()?))
}

/// A read-only view of one root tree.
///
/// Think of it as a snapshot - it won't change even if new commits are made.
pub struct TreeHandle<'repo> {
    repo: &'repo Repository,
    root: TreeId,
}

impl<'repo> TreeHandle<'repo> {
    pub fn new(repo: &'repo Repository, root: TreeId) -> Self {
        Self { repo, root }
    }

    /// get the tree ID
    pub fn id(&self) -> TreeId {
        self.root
    }

    pub fn resolve(&self, path: &PagePath) -> StorageResult<ObjectRef> {
        resolve(self.repo, self.root, path)
    }

    pub fn exists(&self, path: &PagePath) -> StorageResult<bool> {
        Ok(try_resolve(self.repo, self.root, path)?.is_some())
    }

    pub fn is_dir(&self, path: &PagePath) -> StorageResult<bool> {
        Ok(matches!(
            try_resolve(self.repo, self.root, path)?,
            Some(ObjectRef::Tree(_))
        ))
    }

    pub fn is_file(&self, path: &PagePath) -> StorageResult<bool> {
        Ok(matches!(
            try_resolve(self.repo, self.root, path)?,
            Some(ObjectRef::Blob(_))
        ))
    }

    pub fn can_create(&self, path: &PagePath) -> StorageResult<bool> {
        can_create(self.repo, self.root, path)
    }

    /// the blob id at `path`, or None if nothing or a directory is there
    pub fn blob_id(&self, path: &PagePath) -> StorageResult<Option<BlobId>> {
        Ok(try_resolve(self.repo, self.root, path)?.and_then(|o| o.as_blob()))
    }

    /// read the page at `path`
    pub fn read(&self, path: &PagePath) -> StorageResult<Vec<u8>> {
        match self.resolve(path)? {
            ObjectRef::Blob(id) => blob::get_blob(self.repo, id),
            ObjectRef::Tree(_) => Err(StorageError::TypeMismatch {
                path: path.clone(),
                expected: ObjectKind::Blob,
                found: ObjectKind::Tree,
            }),
        }
    }

    /// list the entries of the directory at `path`
    pub fn list(&self, path: &PagePath) -> StorageResult<Vec<TreeEntry>> {
        match self.resolve(path)? {
            ObjectRef::Tree(id) => get_tree(self.repo, id),
            ObjectRef::Blob(_) => Err(StorageError::TypeMismatch {
                path: path.clone(),
                expected: ObjectKind::Tree,
                found: ObjectKind::Blob,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        (dir, repo)
    }

    fn path(s: &str) -> PagePath {
        PagePath::parse(s).unwrap()
    }

    /// a / a.md, a/b.md, a/c/d.md, z.md
    fn sample_tree(repo: &Repository) -> TreeId {
        let mut root = empty_tree(repo).unwrap();
        for (p, content) in [
            ("a.md", "top"),
            ("a/b.md", "b"),
            ("a/c/d.md", "d"),
            ("z.md", "z"),
        ] {
            root = write_path(repo, root, &path(p), content.as_bytes()).unwrap();
        }
        root
    }

    #[test]
    fn test_write_and_read_nested() {
        let (_dir, repo) = setup_repo();
        let root = empty_tree(&repo).unwrap();
        let root = write_path(&repo, root, &path("wiki/home.md"), b"# Home").unwrap();

        let handle = TreeHandle::new(&repo, root);
        assert_eq!(handle.read(&path("wiki/home.md")).unwrap(), b"# Home");
        assert!(handle.is_dir(&path("wiki")).unwrap());
        assert!(handle.is_file(&path("wiki/home.md")).unwrap());
        assert!(!handle.is_file(&path("wiki")).unwrap());
    }

    #[test]
    fn test_resolve_root() {
        let (_dir, repo) = setup_repo();
        let root = sample_tree(&repo);
        assert_eq!(resolve(&repo, root, &PagePath::root()).unwrap(), ObjectRef::Tree(root));
    }

    #[test]
    fn test_resolve_missing_and_mismatch() {
        let (_dir, repo) = setup_repo();
        let root = sample_tree(&repo);

        let missing = resolve(&repo, root, &path("a/nope.md"));
        assert!(matches!(missing, Err(StorageError::PathNotFound(_))));

        let mismatch = resolve(&repo, root, &path("a.md/child"));
        match mismatch {
            Err(StorageError::TypeMismatch { path: at, expected, found }) => {
                assert_eq!(at, path("a.md"));
                assert_eq!(expected, ObjectKind::Tree);
                assert_eq!(found, ObjectKind::Blob);
            }
            other => panic!("expected TypeMismatch, got {:?}", other),
        }

        let handle = TreeHandle::new(&repo, root);
        assert!(!handle.exists(&path("a.md/child")).unwrap());
        assert!(!handle.exists(&path("a/nope.md")).unwrap());
    }

    #[test]
    fn test_structural_sharing() {
        let (_dir, repo) = setup_repo();
        let root = sample_tree(&repo);
        let before_c = resolve(&repo, root, &path("a/c")).unwrap();
        let before_z = resolve(&repo, root, &path("z.md")).unwrap();

        let new_root = write_path(&repo, root, &path("a/b.md"), b"changed").unwrap();
        assert_ne!(new_root, root);
        assert_ne!(
            resolve(&repo, new_root, &path("a")).unwrap(),
            resolve(&repo, root, &path("a")).unwrap()
        );
        assert_eq!(resolve(&repo, new_root, &path("a/c")).unwrap(), before_c);
        assert_eq!(resolve(&repo, new_root, &path("z.md")).unwrap(), before_z);

        // the old snapshot is untouched
        assert_eq!(TreeHandle::new(&repo, root).read(&path("a/b.md")).unwrap(), b"b");
    }

    #[test]
    fn test_same_content_same_root() {
        let (_dir, repo) = setup_repo();
        let root = sample_tree(&repo);
        let rewritten = write_path(&repo, root, &path("a/b.md"), b"b").unwrap();
        assert_eq!(rewritten, root);
    }

    #[test]
    fn test_write_through_file_is_mismatch() {
        let (_dir, repo) = setup_repo();
        let root = sample_tree(&repo);
        let result = write_path(&repo, root, &path("a.md/x.md"), b"x");
        assert!(matches!(
            result,
            Err(StorageError::TypeMismatch { expected: ObjectKind::Tree, .. })
        ));
    }

    #[test]
    fn test_write_over_directory_is_mismatch() {
        let (_dir, repo) = setup_repo();
        let root = sample_tree(&repo);
        let result = write_path(&repo, root, &path("a/c"), b"x");
        assert!(matches!(
            result,
            Err(StorageError::TypeMismatch { expected: ObjectKind::Blob, .. })
        ));
        assert!(write_path(&repo, root, &PagePath::root(), b"x").is_err());
    }

    #[test]
    fn test_can_create() {
        let (_dir, repo) = setup_repo();
        let root = sample_tree(&repo);

        assert!(can_create(&repo, root, &path("new.md")).unwrap());
        assert!(can_create(&repo, root, &path("a/new/deep.md")).unwrap());
        // overwrite in place
        assert!(can_create(&repo, root, &path("a/b.md")).unwrap());
        // a file used as a directory
        assert!(!can_create(&repo, root, &path("a.md/x")).unwrap());
        assert!(!can_create(&repo, root, &path("a/b.md/x/y")).unwrap());
        // directories and the root
        assert!(!can_create(&repo, root, &path("a/c")).unwrap());
        assert!(!can_create(&repo, root, &PagePath::root()).unwrap());
    }

    #[test]
    fn test_list_sorted() {
        let (_dir, repo) = setup_repo();
        let root = sample_tree(&repo);
        let handle = TreeHandle::new(&repo, root);

        let names: Vec<_> = handle
            .list(&PagePath::root())
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.object.kind()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("a".to_string(), ObjectKind::Tree),
                ("a.md".to_string(), ObjectKind::Blob),
                ("z.md".to_string(), ObjectKind::Blob),
            ]
        );

        assert!(matches!(handle.list(&path("a.md")), Err(StorageError::TypeMismatch { .. })));
    }

    #[test]
    fn test_put_tree_order_independent() {
        let (_dir, repo) = setup_repo();
        let x = ObjectRef::Blob(blob::put_blob(&repo, b"x").unwrap());
        let y = ObjectRef::Blob(blob::put_blob(&repo, b"y").unwrap());

        let forward = put_tree(&repo, &[TreeEntry::new("x", x), TreeEntry::new("y", y)]).unwrap();
        let backward = put_tree(&repo, &[TreeEntry::new("y", y), TreeEntry::new("x", x)]).unwrap();
        assert_eq!(forward, backward);

        let entries = get_tree(&repo, forward).unwrap();
        assert_eq!(entries, vec![TreeEntry::new("x", x), TreeEntry::new("y", y)]);
    }

    #[test]
    fn test_put_tree_rejects_bad_names() {
        let (_dir, repo) = setup_repo();
        let x = ObjectRef::Blob(blob::put_blob(&repo, b"x").unwrap());
        assert!(put_tree(&repo, &[TreeEntry::new("a/b", x)]).is_err());
        assert!(put_tree(&repo, &[TreeEntry::new("x", x), TreeEntry::new("x", x)]).is_err());
    }

    #[test]
    fn test_blob_id() {
        let (_dir, repo) = setup_repo();
        let root = sample_tree(&repo);
        let handle = TreeHandle::new(&repo, root);

        assert_eq!(
            handle.blob_id(&path("a/b.md")).unwrap(),
            Some(blob::hash_blob(b"b").unwrap())
        );
        assert_eq!(handle.blob_id(&path("a")).unwrap(), None);
        assert_eq!(handle.blob_id(&path("missing.md")).unwrap(), None);
    }
}
