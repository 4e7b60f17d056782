//! Line diff between two revisions of a page.
//!
//! Myers diff from `similar`, grouped into hunks with three lines of
//! context, the shape a two-column revision comparison is rendered from.

use serde::Serialize;
use similar::{ChangeTag, TextDiff};

/// The result of diffing two page revisions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BlobDiff {
    pub hunks: Vec<DiffHunk>,
    /// Total number of lines in the old text.
    pub old_lines: usize,
    /// Total number of lines in the new text.
    pub new_lines: usize,
}

impl BlobDiff {
    /// Returns `true` if the two texts are identical.
    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    pub fn additions(&self) -> usize {
        self.count(|l| matches!(l, DiffLine::Added(_)))
    }

    pub fn deletions(&self) -> usize {
        self.count(|l| matches!(l, DiffLine::Removed(_)))
    }

    fn count(&self, pred: impl Fn(&DiffLine) -> bool) -> usize {
        self.hunks
            .iter()
            .flat_map(|h| &h.lines)
            .filter(|l| pred(l))
            .count()
    }

    /// Render in unified diff format, without file headers.
    pub fn to_unified(&self) -> String {
        let mut out = String::new();
        for hunk in &self.hunks {
            out.push_str(&format!(
                "@@ -{},{} +{},{} @@\n",
                hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count
            ));
            for line in &hunk.lines {
                let (sign, text) = match line {
                    DiffLine::Context(t) => (' ', t),
                    DiffLine::Added(t) => ('+', t),
                    DiffLine::Removed(t) => ('-', t),
                };
                out.push(sign);
                out.push_str(text);
                out.push('\n');
            }
        }
        out
    }
}

/// A contiguous region of changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiffHunk {
    /// 1-based
    pub old_start: usize,
    pub old_count: usize,
    /// 1-based
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<DiffLine>,
}

/// A single line in a hunk, without its line terminator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "lowercase")]
pub enum DiffLine {
    Context(String),
    Added(String),
    Removed(String),
}

/// Compute a line-by-line diff between two texts.
pub fn diff_text(old: &str, new: &str) -> BlobDiff {
    let old_lines = old.lines().count();
    let new_lines = new.lines().count();

    if old == new {
        return BlobDiff {
            hunks: Vec::new(),
            old_lines,
            new_lines,
        };
    }

    let text_diff = TextDiff::from_lines(old, new);
    let mut hunks = Vec::new();

    for group in text_diff.grouped_ops(3) {
        let (old_start, new_start) = match group.first() {
            Some(op) => (op.old_range().start + 1, op.new_range().start + 1),
            None => continue,
        };
        let mut hunk = DiffHunk {
            old_start,
            old_count: 0,
            new_start,
            new_count: 0,
            lines: Vec::new(),
        };

        for op in &group {
            for change in text_diff.iter_changes(op) {
                let text = change.value().trim_end_matches('\n').to_string();
                match change.tag() {
                    ChangeTag::Equal => {
                        hunk.lines.push(DiffLine::Context(text));
                        hunk.old_count += 1;
                        hunk.new_count += 1;
                    }
                    ChangeTag::Delete => {
                        hunk.lines.push(DiffLine::Removed(text));
                        hunk.old_count += 1;
                    }
                    ChangeTag::Insert => {
                        hunk.lines.push(DiffLine::Added(text));
                        hunk.new_count += 1;
                    }
                }
            }
        }

        hunks.push(hunk);
    }

    BlobDiff {
        hunks,
        old_lines,
        new_lines,
    }
}
