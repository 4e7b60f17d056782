//! Text algorithms over page content: line diff and three-way merge.
//!
//! Both are pure functions of their inputs. Decoding stored bytes into text
//! happens before these are called.

mod diff;
mod merge;

pub use diff::{diff_text, BlobDiff, DiffHunk, DiffLine};
pub use merge::{merge, MergeOutcome, MARKER_CURRENT, MARKER_SEPARATOR, MARKER_SUBMITTED};
