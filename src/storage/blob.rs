//! Blob operations for page content.
//!
//! A blob is the raw bytes of one page. Its id is the git object hash of the
//! content, so the same bytes always land on the same id no matter which
//! path or commit refers to them, and storing them twice writes nothing new.

use git2::{ObjectType, Oid, Repository};
use tracing::debug;

use crate::storage::error::{StorageError, StorageResult};
pub(crate) use crate::storage::types::BlobId;

/// compute the id `content` would have without storing it
pub fn hash_blob(content: &[u8]) -> StorageResult<BlobId> {
    Ok(BlobId::new(Oid::hash_object(ObjectType::Blob, content)?))
}

/// write bytes as a blob, returning its id
///
/// idempotent: content already present in the object database is not
/// written again
pub fn put_blob(repo: &Repository, content: &[u8]) -> StorageResult<BlobId> {
    let id = hash_blob(content)?;
    if repo.odb()?.exists(id.raw()) {
        debug!(blob = %id.short(), "blob already stored");
        return Ok(id);
    }

    let oid = repo.blob(content)?;
    debug!(blob = %id.short(), size = content.len(), "blob written");
    Ok(BlobId::new(oid))
}

/// read a blob's content from the repository
pub fn get_blob(repo: &Repository, blob_id: BlobId) -> StorageResult<Vec<u8>> {
    let blob = find_blob(repo, blob_id)?;
    Ok(blob.content().to_vec())
}

/// read a blob and decode it as UTF-8
pub fn get_text(repo: &Repository, blob_id: BlobId) -> StorageResult<String> {
    let bytes = get_blob(repo, blob_id)?;
    decode_text(bytes, &blob_id.to_string())
}

/// decode page bytes as text without lossy replacement
pub fn decode_text(bytes: Vec<u8>, what: &str) -> StorageResult<String> {
    String::from_utf8(bytes).map_err(|e| StorageError::DecodeFailure {
        what: what.to_string(),
        source: e.utf8_error(),
    })
}

/// look up a blob, telling "missing" apart from "not a blob"
pub(crate) fn find_blob(repo: &Repository, blob_id: BlobId) -> StorageResult<git2::Blob<'_>> {
    let object = match repo.find_object(blob_id.raw(), None) {
        Ok(object) => object,
        Err(e) if e.code() == git2::ErrorCode::NotFound => {
            return Err(StorageError::ObjectNotFound(blob_id.to_string()));
        }
        Err(e) => return Err(StorageError::Git(e)),
    };

    let kind = object.kind();
    object.into_blob().map_err(|_| StorageError::CorruptedObject {
        oid: blob_id.to_string(),
        reason: format!("expected blob, found {:?}", kind),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_put_and_get() {
        let (_dir, repo) = setup_repo();
        let id = put_blob(&repo, b"# Home\n").unwrap();
        assert_eq!(get_blob(&repo, id).unwrap(), b"# Home\n");
        assert_eq!(get_text(&repo, id).unwrap(), "# Home\n");
    }

    #[test]
    fn test_known_git_hash() {
        // the well-known id of the empty blob
        let id = hash_blob(b"").unwrap();
        assert_eq!(id.to_string(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }

    #[test]
    fn test_put_is_idempotent() {
        let (_dir, repo) = setup_repo();
        let first = put_blob(&repo, b"same").unwrap();
        let second = put_blob(&repo, b"same").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_blob() {
        let (_dir, repo) = setup_repo();
        let id = hash_blob(b"never stored").unwrap();
        assert!(matches!(get_blob(&repo, id), Err(StorageError::ObjectNotFound(_))));
    }

    #[test]
    fn test_tree_is_not_a_blob() {
        let (_dir, repo) = setup_repo();
        let tree = repo.treebuilder(None).unwrap().write().unwrap();
        let result = get_blob(&repo, BlobId::new(tree));
        assert!(matches!(result, Err(StorageError::CorruptedObject { .. })));
    }

    #[test]
    fn test_binary_is_decode_failure() {
        let (_dir, repo) = setup_repo();
        let id = put_blob(&repo, &[0xff, 0xfe, 0x00, 0x80]).unwrap();
        assert!(get_blob(&repo, id).is_ok());
        assert!(matches!(get_text(&repo, id), Err(StorageError::DecodeFailure { .. })));

        assert!(repo.find_blob(id.raw()).unwrap().is_binary());
    }

    proptest! {
        #[test]
        fn prop_content_addressing(a in proptest::collection::vec(any::<u8>(), 0..256),
                                   b in proptest::collection::vec(any::<u8>(), 0..256)) {
            let id_a = hash_blob(&a).unwrap();
            let id_b = hash_blob(&b).unwrap();
            prop_assert_eq!(a == b, id_a == id_b);
        }
    }
}
