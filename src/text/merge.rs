//! Three-way merge of page text.
//!
//! diff3 over lines: `base` is diffed against each side with Myers, the lines
//! of `base` matched on both sides split the three texts into stable runs
//! and unstable chunks, and each unstable chunk is resolved on its own:
//!
//! | current  | submitted | result        |
//! |----------|-----------|---------------|
//! | = base   | any       | submitted     |
//! | any      | = base    | current       |
//! | = other  | = other   | either        |
//! | differs  | differs   | conflict      |
//!
//! A conflict keeps both candidates between markers:
//!
//! ```text
//! <<<<<<< current
//! ...what was stored...
//! =======
//! ...what was submitted...
//! >>>>>>> submitted
//! ```
//!
//! Lines are matched without their terminator, so a final line that lacks
//! a newline on one side still lines up with the same line on another.

use similar::{capture_diff_slices, Algorithm, DiffOp};

pub const MARKER_CURRENT: &str = "<<<<<<< current";
pub const MARKER_SEPARATOR: &str = "=======";
pub const MARKER_SUBMITTED: &str = ">>>>>>> submitted";

/// Result of a three-way merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// merged text; contains conflict markers unless the merge is clean
    pub text: String,
    /// number of conflicting regions
    pub conflicts: usize,
}

impl MergeOutcome {
    pub fn is_clean(&self) -> bool {
        self.conflicts == 0
    }
}

/// Merge `mine` (the stored text) and `theirs` (the submitted text), which
/// both descend from `base`.
pub fn merge(base: &str, mine: &str, theirs: &str) -> MergeOutcome {
    if mine == theirs || base == theirs {
        return MergeOutcome {
            text: mine.to_string(),
            conflicts: 0,
        };
    }
    if base == mine {
        return MergeOutcome {
            text: theirs.to_string(),
            conflicts: 0,
        };
    }

    let base_lines = split_lines(base);
    let mine_lines = split_lines(mine);
    let theirs_lines = split_lines(theirs);

    let to_mine = match_lines(&base_lines, &mine_lines);
    let to_theirs = match_lines(&base_lines, &theirs_lines);

    let mut out = Output::default();
    let (mut o, mut a, mut b) = (0, 0, 0);

    loop {
        // stable run: base lines matched on both sides at the current positions
        let mut run = 0;
        while o + run < base_lines.len()
            && to_mine[o + run] == Some(a + run)
            && to_theirs[o + run] == Some(b + run)
        {
            run += 1;
        }
        if run > 0 {
            for k in 0..run {
                // a side that kept the line verbatim defers to the other
                let line = if base_lines[o + k] == mine_lines[a + k] {
                    theirs_lines[b + k]
                } else {
                    mine_lines[a + k]
                };
                out.push(line);
            }
            o += run;
            a += run;
            b += run;
            continue;
        }

        // next base line both sides still agree on, if any
        let sync = (o..base_lines.len())
            .find_map(|j| Some((j, to_mine[j]?, to_theirs[j]?)));

        let (o_end, a_end, b_end) =
            sync.unwrap_or((base_lines.len(), mine_lines.len(), theirs_lines.len()));

        out.resolve(
            &base_lines[o..o_end],
            &mine_lines[a..a_end],
            &theirs_lines[b..b_end],
        );

        if sync.is_none() {
            break;
        }
        o = o_end;
        a = a_end;
        b = b_end;
    }

    MergeOutcome {
        text: out.text,
        conflicts: out.conflicts,
    }
}

/// Line units including their terminator; concatenating them restores the text.
fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// For each base line, the index of the line it is matched to on the other side.
fn match_lines(base: &[&str], other: &[&str]) -> Vec<Option<usize>> {
    let base_keys: Vec<&str> = base.iter().map(|l| l.trim_end_matches('\n')).collect();
    let other_keys: Vec<&str> = other.iter().map(|l| l.trim_end_matches('\n')).collect();

    let mut matched = vec![None; base.len()];
    for op in capture_diff_slices(Algorithm::Myers, &base_keys, &other_keys) {
        if let DiffOp::Equal {
            old_index,
            new_index,
            len,
        } = op
        {
            for k in 0..len {
                matched[old_index + k] = Some(new_index + k);
            }
        }
    }
    matched
}

#[derive(Default)]
struct Output {
    text: String,
    conflicts: usize,
}

impl Output {
    /// only the final line of the output may lack its terminator
    fn push(&mut self, line: &str) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
        self.text.push_str(line);
    }

    fn push_all(&mut self, lines: &[&str]) {
        for line in lines {
            self.push(line);
        }
    }

    fn push_marker(&mut self, marker: &str) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
        self.text.push_str(marker);
        self.text.push('\n');
    }

    fn resolve(&mut self, base: &[&str], mine: &[&str], theirs: &[&str]) {
        if mine == base {
            self.push_all(theirs);
        } else if theirs == base || mine == theirs {
            self.push_all(mine);
        } else {
            self.conflicts += 1;
            self.push_marker(MARKER_CURRENT);
            self.push_all(mine);
            self.push_marker(MARKER_SEPARATOR);
            self.push_all(theirs);
            self.push_marker(MARKER_SUBMITTED);
        }
    }
}
