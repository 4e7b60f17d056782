//! core type-safe wrappers around git primitives for the storage layer.

use std::fmt;
use std::fmt::Formatter;

use git2::{ObjectType, Oid};
use serde::{Serialize, Serializer};

/// This makes sure we don't accidentally pass a blob ID where a commit ID
/// is expected. The inner Oid is only accessible within the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitId(pub(crate) Oid);

impl CommitId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    /// raw Oid (for internal use only)
    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    /// parse CommitId from a hex string
    pub fn from_hex(hex: &str) -> Result<Self, git2::Error> {
        Oid::from_str(hex).map(CommitId)
    }

    /// short form of the commit ID
    pub fn short(&self) -> String {
        self.0.to_string()[..7].to_string()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Git blob identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobId(pub(crate) Oid);

impl BlobId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    /// parse a BlobId from a hex string (e.g. the OID an editor last saw)
    pub fn from_hex(hex: &str) -> Result<Self, git2::Error> {
        Oid::from_str(hex).map(BlobId)
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..7].to_string()
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Git tree identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeId(pub(crate) Oid);

impl TreeId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    pub fn from_hex(hex: &str) -> Result<Self, git2::Error> {
        Oid::from_str(hex).map(TreeId)
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! serialize_as_hex {
    ($($ty:ty),*) => {
        $(
            impl Serialize for $ty {
                fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                    serializer.serialize_str(&self.0.to_string())
                }
            }
        )*
    };
}

serialize_as_hex!(CommitId, BlobId, TreeId);

/// The kind of object a tree entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Blob,
    Tree,
}

impl ObjectKind {
    /// git file mode used when this kind is stored in a tree
    pub fn file_mode(&self) -> i32 {
        match self {
            ObjectKind::Blob => git2::FileMode::Blob.into(),
            ObjectKind::Tree => git2::FileMode::Tree.into(),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Blob => write!(f, "blob"),
            ObjectKind::Tree => write!(f, "tree"),
        }
    }
}

/// A reference to a stored object whose kind is known.
///
/// Everything that walks a tree matches on this instead of asking the
/// object database what it just found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "oid", rename_all = "lowercase")]
pub enum ObjectRef {
    Blob(BlobId),
    Tree(TreeId),
}

impl ObjectRef {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectRef::Blob(_) => ObjectKind::Blob,
            ObjectRef::Tree(_) => ObjectKind::Tree,
        }
    }

    pub fn as_blob(&self) -> Option<BlobId> {
        match self {
            ObjectRef::Blob(id) => Some(*id),
            ObjectRef::Tree(_) => None,
        }
    }

    pub fn as_tree(&self) -> Option<TreeId> {
        match self {
            ObjectRef::Tree(id) => Some(*id),
            ObjectRef::Blob(_) => None,
        }
    }

    pub(crate) fn raw(&self) -> Oid {
        match self {
            ObjectRef::Blob(id) => id.raw(),
            ObjectRef::Tree(id) => id.raw(),
        }
    }

    /// classify a raw git tree entry; submodule links and tags yield None
    pub(crate) fn from_entry(entry: &git2::TreeEntry<'_>) -> Option<Self> {
        match entry.kind()? {
            ObjectType::Blob => Some(ObjectRef::Blob(BlobId::new(entry.id()))),
            ObjectType::Tree => Some(ObjectRef::Tree(TreeId::new(entry.id()))),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.raw())
    }
}

/// One named entry of a directory snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    pub name: String,
    pub object: ObjectRef,
}

impl TreeEntry {
    pub fn new(name: impl Into<String>, object: ObjectRef) -> Self {
        Self {
            name: name.into(),
            object,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.object.kind()
    }

    pub fn file_mode(&self) -> i32 {
        self.kind().file_mode()
    }
}

/// A validated, slash-separated location in a tree.
///
/// The empty segment list is the root. Paths are checked before any store
/// access so traversal segments and control characters never reach git.
///
/// Valid segments:
/// - 1-255 bytes
/// - no control characters, no backslash
/// - not `.`, `..` or `.git`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PagePath {
    segments: Vec<String>,
}

impl PagePath {
    /// maximum number of segments; bounds the tree rewrite recursion
    pub const MAX_DEPTH: usize = 32;

    /// maximum length of one segment in bytes
    pub const MAX_SEGMENT_LEN: usize = 255;

    const RESERVED: &'static [&'static str] = &[".", "..", ".git"];

    /// parse a path such as `wiki/home.md`; one leading slash is tolerated
    pub fn parse(path: &str) -> Result<Self, InvalidPathError> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();
        if segments.len() > Self::MAX_DEPTH {
            return Err(InvalidPathError::TooDeep(segments.len()));
        }
        for segment in &segments {
            Self::validate_segment(segment)?;
        }

        Ok(Self { segments })
    }

    /// the root of the tree
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    fn validate_segment(segment: &str) -> Result<(), InvalidPathError> {
        if segment.is_empty() {
            return Err(InvalidPathError::EmptySegment);
        }

        if segment.len() > Self::MAX_SEGMENT_LEN {
            return Err(InvalidPathError::SegmentTooLong(segment.len()));
        }

        for (i, c) in segment.chars().enumerate() {
            if c.is_control() || c == '\\' {
                return Err(InvalidPathError::InvalidCharacter { char: c, position: i });
            }
        }

        if Self::RESERVED.contains(&segment.to_lowercase().as_str()) {
            return Err(InvalidPathError::Reserved(segment.to_string()));
        }

        Ok(())
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// last segment, if any
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// the containing directory; the root is its own parent
    pub fn parent(&self) -> PagePath {
        let mut segments = self.segments.clone();
        segments.pop();
        Self { segments }
    }

    /// append one segment
    pub fn join(&self, name: &str) -> Result<PagePath, InvalidPathError> {
        if self.segments.len() >= Self::MAX_DEPTH {
            return Err(InvalidPathError::TooDeep(self.segments.len() + 1));
        }
        Self::validate_segment(name)?;
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(Self { segments })
    }

    /// the first `len` segments
    pub fn prefix(&self, len: usize) -> PagePath {
        Self {
            segments: self.segments[..len.min(self.segments.len())].to_vec(),
        }
    }

    /// the path as a slash-joined string (no leading slash)
    pub fn as_string(&self) -> String {
        self.segments.join("/")
    }
}

impl fmt::Display for PagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

impl Serialize for PagePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl std::str::FromStr for PagePath {
    type Err = InvalidPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// git signature (author/committer info)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSignature {
    pub name: String,
    pub email: String,
}

impl GitSignature {
    /// create a new signature
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// the signature used when the request layer supplies no identity
    pub fn anonymous() -> Self {
        Self::new("anonymous", "anonymous@localhost")
    }

    /// convert to git2::Signature
    pub(crate) fn to_git2_signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

impl Default for GitSignature {
    fn default() -> Self {
        Self::anonymous()
    }
}

/// error type for paths rejected before touching the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidPathError {
    EmptySegment,
    TooDeep(usize),
    SegmentTooLong(usize),
    InvalidCharacter { char: char, position: usize },
    Reserved(String),
}

impl fmt::Display for InvalidPathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySegment => write!(f, "path contains an empty segment"),
            Self::TooDeep(depth) => write!(
                f,
                "path too deep: {} segments (max {})",
                depth,
                PagePath::MAX_DEPTH
            ),
            Self::SegmentTooLong(len) => write!(f, "path segment too long: {} bytes", len),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character {:?} at position {}", char, position)
            }
            Self::Reserved(name) => write!(f, "'{}' is a reserved name", name),
        }
    }
}

impl std::error::Error for InvalidPathError {}
