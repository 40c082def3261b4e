//! Line-based three-way text merge.

use crate::storage_merger::{MergeResult, StorageMerger};
use similar::{capture_diff_slices, Algorithm, DiffTag};
use std::ops::Range;
use tracing::debug;

/// A run of changed lines: `base` lines replaced by `side` lines
#[derive(Debug, Clone, PartialEq, Eq)]
struct Hunk {
    base: Range<usize>,
    side: Range<usize>,
}

fn lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Changed regions of `side` relative to `base`, in base order
fn hunks(base: &[&str], side: &[&str]) -> Vec<Hunk> {
    let mut hunks: Vec<Hunk> = Vec::new();
    for op in capture_diff_slices(Algorithm::Myers, base, side) {
        let (tag, old, new) = op.as_tag_tuple();
        if tag == DiffTag::Equal {
            continue;
        }
        match hunks.last_mut() {
            Some(last) if last.base.end == old.start && last.side.end == new.start => {
                last.base.end = old.end;
                last.side.end = new.end;
            }
            _ => hunks.push(Hunk {
                base: old,
                side: new,
            }),
        }
    }
    hunks
}

/// Whether an edit of `a` interferes with an edit of `b`
///
/// Overlapping ranges interfere. An insertion (empty range) interferes with
/// any edit whose range contains or borders its position. Non-empty edits
/// that only share a boundary do not.
fn touches(a: &Range<usize>, b: &Range<usize>) -> bool {
    if a.is_empty() {
        return b.start <= a.start && a.start <= b.end;
    }
    if b.is_empty() {
        return a.start <= b.start && b.start <= a.end;
    }
    a.start < b.end && b.start < a.end
}

/// `base[lo..hi]` with the given hunks of one side applied
fn apply<'a>(
    base: &[&'a str],
    side: &[&'a str],
    hunks: &[&Hunk],
    lo: usize,
    hi: usize,
) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut cursor = lo;
    for hunk in hunks {
        out.extend_from_slice(&base[cursor..hunk.base.start]);
        out.extend_from_slice(&side[hunk.side.clone()]);
        cursor = hunk.base.end;
    }
    out.extend_from_slice(&base[cursor..hi]);
    out
}

/// Merge `local` and `remote` edits of `base`; `None` on conflict
fn diff3(base: &str, local: &str, remote: &str) -> Option<String> {
    let base_lines = lines(base);
    let local_lines = lines(local);
    let remote_lines = lines(remote);
    let local_hunks = hunks(&base_lines, &local_lines);
    let remote_hunks = hunks(&base_lines, &remote_lines);

    let mut out: Vec<&str> = Vec::with_capacity(base_lines.len());
    let mut pos = 0;
    let (mut i, mut j) = (0, 0);

    while i < local_hunks.len() || j < remote_hunks.len() {
        let take_local = j >= remote_hunks.len()
            || (i < local_hunks.len() && local_hunks[i].base.start <= remote_hunks[j].base.start);
        let mut from_local: Vec<&Hunk> = Vec::new();
        let mut from_remote: Vec<&Hunk> = Vec::new();
        let (mut lo, mut hi) = if take_local {
            from_local.push(&local_hunks[i]);
            i += 1;
            (local_hunks[i - 1].base.start, local_hunks[i - 1].base.end)
        } else {
            from_remote.push(&remote_hunks[j]);
            j += 1;
            (remote_hunks[j - 1].base.start, remote_hunks[j - 1].base.end)
        };

        loop {
            let mut grew = false;
            if i < local_hunks.len() && touches(&local_hunks[i].base, &(lo..hi)) {
                lo = lo.min(local_hunks[i].base.start);
                hi = hi.max(local_hunks[i].base.end);
                from_local.push(&local_hunks[i]);
                i += 1;
                grew = true;
            }
            if j < remote_hunks.len() && touches(&remote_hunks[j].base, &(lo..hi)) {
                lo = lo.min(remote_hunks[j].base.start);
                hi = hi.max(remote_hunks[j].base.end);
                from_remote.push(&remote_hunks[j]);
                j += 1;
                grew = true;
            }
            if !grew {
                break;
            }
        }

        out.extend_from_slice(&base_lines[pos..lo]);
        match (from_local.is_empty(), from_remote.is_empty()) {
            (false, true) => {
                out.extend(apply(&base_lines, &local_lines, &from_local, lo, hi));
            }
            (true, false) => {
                out.extend(apply(&base_lines, &remote_lines, &from_remote, lo, hi));
            }
            _ => {
                let ours = apply(&base_lines, &local_lines, &from_local, lo, hi);
                let theirs = apply(&base_lines, &remote_lines, &from_remote, lo, hi);
                if ours != theirs {
                    debug!("Conflicting edits over base lines {}..{}", lo, hi);
                    return None;
                }
                out.extend(ours);
            }
        }
        pos = hi;
    }
    out.extend_from_slice(&base_lines[pos..]);
    Some(out.concat())
}

/// Built-in merger for text content
///
/// Edits to different lines combine; edits to the same lines conflict unless
/// both sides made the same change.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextStorageMerger;

impl TextStorageMerger {
    pub fn new() -> Self {
        Self
    }
}

impl StorageMerger for TextStorageMerger {
    fn merge(&self, ancestor: Option<&[u8]>, local: &[u8], remote: &[u8]) -> MergeResult {
        if local == remote {
            return MergeResult::Merged(local.to_vec());
        }
        let Some(ancestor) = ancestor else {
            return MergeResult::Conflict;
        };
        if ancestor == local {
            return MergeResult::Merged(remote.to_vec());
        }
        if ancestor == remote {
            return MergeResult::Merged(local.to_vec());
        }

        let (base, ours, theirs) = match (
            std::str::from_utf8(ancestor),
            std::str::from_utf8(local),
            std::str::from_utf8(remote),
        ) {
            (Ok(base), Ok(ours), Ok(theirs)) => (base, ours, theirs),
            _ => return MergeResult::Error("content is not valid UTF-8".to_string()),
        };

        match diff3(base, ours, theirs) {
            Some(merged) => MergeResult::Merged(merged.into_bytes()),
            None => MergeResult::Conflict,
        }
    }
}
