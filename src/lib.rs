//! gitwiki - a version-controlled page store
//!
//! Every page is a blob in a git object database, every directory is a
//! tree, and every edit is a commit. Concurrent edits of the same page are
//! reconciled with a three-way merge instead of overwriting each other.
//!
//! # Example
//!
//! ```no_run
//! use gitwiki::wiki::Wiki;
//!
//! let wiki = Wiki::open("./my_wiki").unwrap();
//! let home = wiki.page_path("home").unwrap();
//! let base = wiki.blob_id(&home).unwrap();
//! wiki.edit(&home, base, b"# Home\n", Some("alice"), "init").unwrap();
//! ```

pub mod storage;
pub mod text;
pub mod transaction;
pub mod wiki;
