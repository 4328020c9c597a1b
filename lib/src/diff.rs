//! Line diff, hunk grouping, binary detection and rename detection. An
//! LCS line matcher underneath hunk grouping, tagging each line as plain
//! `{Context, Add, Remove}` rather than a match/non-match hunk kind.

use std::collections::HashMap;

use itertools::Itertools as _;

const BINARY_SNIFF_LEN: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTag {
    Context,
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub tag: LineTag,
    pub content: Vec<u8>,
    /// True if this line was the buffer's last and had no trailing `\n`.
    pub no_newline_at_eof: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<DiffLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffResult {
    Text(Vec<Hunk>),
    Binary,
}

/// Splits a buffer into lines, keeping track of which (if any) final line
/// lacks a trailing `\n` (spec §4.5 "no newline at end of file").
fn split_lines(buf: &[u8]) -> Vec<&[u8]> {
    if buf.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<&[u8]> = buf.split(|&b| b == b'\n').collect();
    // `split` on a buffer ending in `\n` yields a trailing empty slice;
    // drop it, since that's not a real final line.
    if buf.ends_with(b"\n") {
        lines.pop();
    }
    lines
}

/// Returns true if `buf` contains a NUL byte within its first 8 KiB (spec
/// §4.5 "Binary detection").
pub fn is_binary(buf: &[u8]) -> bool {
    buf.iter().take(BINARY_SNIFF_LEN).any(|&b| b == 0)
}

/// Opcode produced by the LCS backtrace: which side (or both) contributed a
/// line at this step.
enum Op {
    Equal(usize, usize),
    Remove(usize),
    Add(usize),
}

/// Owned-line variant of [`Op`], used by the merge engine to diff a side
/// against the three-way base without depending on this module's private
/// borrowed representation.
pub(crate) enum LineOp {
    Equal(Vec<u8>),
    Remove(Vec<u8>),
    Add(Vec<u8>),
}

/// Splits `buf` into owned lines (spec §4.5's line splitting, detached from
/// the input's lifetime for callers that need to hold them alongside other
/// owned state).
pub(crate) fn split_lines_owned(buf: &[u8]) -> Vec<Vec<u8>> {
    split_lines(buf).into_iter().map(<[u8]>::to_vec).collect()
}

/// The base-to-`other` edit script as owned line operations (used by the
/// merge engine's line-level three-way merge).
pub(crate) fn diff_ops(base: &[u8], other: &[u8]) -> Vec<LineOp> {
    let base_lines = split_lines(base);
    let other_lines = split_lines(other);
    let ops = lcs_align(&base_lines, &other_lines);
    ops.into_iter()
        .map(|op| match op {
            Op::Equal(i, _) => LineOp::Equal(base_lines[i].to_vec()),
            Op::Remove(i) => LineOp::Remove(base_lines[i].to_vec()),
            Op::Add(j) => LineOp::Add(other_lines[j].to_vec()),
        })
        .collect()
}

/// Computes an LCS alignment between `old` and `new` lines. Ties in the
/// traceback prefer to consume matching context first, which keeps runs of
/// context compact rather than front-loading all adds or removes (spec
/// §4.5 "ties in the LCS traceback prefer longer runs of context").
fn lcs_align(old: &[&[u8]], new: &[&[u8]]) -> Vec<Op> {
    let n = old.len();
    let m = new.len();
    // table[i][j] = LCS length of old[i..] and new[j..]
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if old[i] == new[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }
    let mut ops = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            ops.push(Op::Equal(i, j));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            ops.push(Op::Remove(i));
            i += 1;
        } else {
            ops.push(Op::Add(j));
            j += 1;
        }
    }
    while i < n {
        ops.push(Op::Remove(i));
        i += 1;
    }
    while j < m {
        ops.push(Op::Add(j));
        j += 1;
    }
    ops
}

/// Builds the tagged line sequence from LCS ops, marking `no_newline_at_eof`
/// from whether the *source buffer itself* lacked a trailing `\n` — not from
/// whether a line happens to sit at the last index of its source array, which
/// is also true for a line immediately before a real trailing newline.
fn to_diff_lines(
    ops: &[Op],
    old: &[&[u8]],
    new: &[&[u8]],
    old_ends_with_newline: bool,
    new_ends_with_newline: bool,
) -> Vec<DiffLine> {
    ops.iter()
        .map(|op| match *op {
            Op::Equal(i, j) => DiffLine {
                tag: LineTag::Context,
                content: old[i].to_vec(),
                no_newline_at_eof: (i == old.len() - 1 && !old_ends_with_newline)
                    || (j == new.len() - 1 && !new_ends_with_newline),
            },
            Op::Remove(i) => DiffLine {
                tag: LineTag::Remove,
                content: old[i].to_vec(),
                no_newline_at_eof: i == old.len() - 1 && !old_ends_with_newline,
            },
            Op::Add(j) => DiffLine {
                tag: LineTag::Add,
                content: new[j].to_vec(),
                no_newline_at_eof: j == new.len() - 1 && !new_ends_with_newline,
            },
        })
        .collect()
}

/// Groups a flat tagged-line sequence into non-overlapping hunks, keeping
/// `context` lines of surrounding context around each run of changes (spec
/// §4.5 "Hunk grouping"). Two change runs merge into a single hunk when the
/// context between them is short enough that their context windows would
/// otherwise overlap.
fn group_hunks(lines: &[DiffLine], context: usize) -> Vec<Hunk> {
    let changed: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.tag != LineTag::Context)
        .map(|(i, _)| i)
        .collect();
    if changed.is_empty() {
        return Vec::new();
    }

    // Cluster changed-line indices: consecutive changes merge into one
    // cluster when separated by at most `2 * context` lines of context,
    // since each side's context window would otherwise touch or overlap.
    let mut clusters: Vec<(usize, usize)> = Vec::new();
    let mut cluster_start = changed[0];
    let mut cluster_end = changed[0];
    for &idx in &changed[1..] {
        if idx <= cluster_end + 2 * context + 1 {
            cluster_end = idx;
        } else {
            clusters.push((cluster_start, cluster_end));
            cluster_start = idx;
            cluster_end = idx;
        }
    }
    clusters.push((cluster_start, cluster_end));

    let mut hunks = Vec::with_capacity(clusters.len());
    for (first, last) in clusters {
        let start = first.saturating_sub(context);
        let end = (last + context + 1).min(lines.len());
        let slice = &lines[start..end];
        let old_start = 1 + lines[..start].iter().filter(|l| l.tag != LineTag::Add).count();
        let new_start = 1 + lines[..start].iter().filter(|l| l.tag != LineTag::Remove).count();
        let old_count = slice.iter().filter(|l| l.tag != LineTag::Add).count();
        let new_count = slice.iter().filter(|l| l.tag != LineTag::Remove).count();
        hunks.push(Hunk {
            old_start,
            old_count,
            new_start,
            new_count,
            lines: slice.to_vec(),
        });
    }
    hunks
}

/// Diffs two byte buffers, returning [`DiffResult::Binary`] if either looks
/// binary (spec §4.5 "Binary detection"), otherwise a list of hunks with
/// `context` lines of surrounding context (default 3, spec §4.5).
pub fn diff(old: &[u8], new: &[u8], context: usize) -> DiffResult {
    if is_binary(old) || is_binary(new) {
        return DiffResult::Binary;
    }
    let old_lines = split_lines(old);
    let new_lines = split_lines(new);
    let ops = lcs_align(&old_lines, &new_lines);
    let lines = to_diff_lines(&ops, &old_lines, &new_lines, old.ends_with(b"\n"), new.ends_with(b"\n"));
    DiffResult::Text(group_hunks(&lines, context))
}

pub const DEFAULT_CONTEXT: usize = 3;
pub const DEFAULT_RENAME_THRESHOLD: f64 = 0.5;

/// A candidate rename pairing across a set of added/removed paths (spec
/// §4.5 "Rename detection").
#[derive(Debug, Clone, PartialEq)]
pub struct RenameCandidate {
    pub old_path: String,
    pub new_path: String,
    pub similarity: f64,
}

/// `1 - edit_distance / max(len)` on the two buffers' line sets, per spec
/// §4.5.
fn line_similarity(old: &[u8], new: &[u8]) -> f64 {
    let old_lines = split_lines(old);
    let new_lines = split_lines(new);
    let max_len = old_lines.len().max(new_lines.len());
    if max_len == 0 {
        return 1.0;
    }
    let distance = line_edit_distance(&old_lines, &new_lines);
    1.0 - (distance as f64 / max_len as f64)
}

/// Classic Levenshtein edit distance over whole lines as tokens (insert,
/// delete, substitute all cost 1), used only for the rename similarity
/// score — this is not the diff-output algorithm.
fn line_edit_distance(a: &[&[u8]], b: &[&[u8]]) -> usize {
    let n = a.len();
    let m = b.len();
    let mut prev: Vec<usize> = (0..=m).collect();
    let mut curr = vec![0usize; m + 1];
    for i in 1..=n {
        curr[0] = i;
        for j in 1..=m {
            curr[j] = if a[i - 1] == b[j - 1] {
                prev[j - 1]
            } else {
                1 + prev[j - 1].min(prev[j]).min(curr[j - 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[m]
}

/// Computes the best cross-pairing of `removed` against `added` whose
/// similarity exceeds `threshold`, opt-in per spec §4.5. Each path is
/// matched at most once, greedily by descending similarity.
pub fn detect_renames(
    removed: &[(String, &[u8])],
    added: &[(String, &[u8])],
    threshold: f64,
) -> Vec<RenameCandidate> {
    let mut scored: Vec<(f64, String, String)> = removed
        .iter()
        .cartesian_product(added.iter())
        .filter_map(|((old_path, old_content), (new_path, new_content))| {
            let similarity = line_similarity(old_content, new_content);
            (similarity >= threshold).then(|| (similarity, old_path.clone(), new_path.clone()))
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
    let mut used_old: HashMap<String, bool> = HashMap::new();
    let mut used_new: HashMap<String, bool> = HashMap::new();
    let mut result = Vec::new();
    for (similarity, old_path, new_path) in scored {
        if used_old.contains_key(&old_path) || used_new.contains_key(&new_path) {
            continue;
        }
        used_old.insert(old_path.clone(), true);
        used_new.insert(new_path.clone(), true);
        result.push(RenameCandidate {
            old_path,
            new_path,
            similarity,
        });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_buffers_produce_no_hunks() {
        let result = diff(b"a\nb\nc\n", b"a\nb\nc\n", DEFAULT_CONTEXT);
        assert_eq!(result, DiffResult::Text(vec![]));
    }

    #[test]
    fn single_line_addition_produces_one_hunk() {
        let result = diff(b"hello\n", b"hello\nworld\n", DEFAULT_CONTEXT);
        let DiffResult::Text(hunks) = result else { panic!("expected text diff") };
        assert_eq!(hunks.len(), 1);
        let added: Vec<_> = hunks[0]
            .lines
            .iter()
            .filter(|l| l.tag == LineTag::Add)
            .collect();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].content, b"world");
    }

    #[test]
    fn no_newline_at_eof_is_marked() {
        let result = diff(b"a\n", b"a", DEFAULT_CONTEXT);
        let DiffResult::Text(hunks) = result else { panic!() };
        let last = hunks.last().and_then(|h| h.lines.last()).unwrap();
        assert!(last.no_newline_at_eof);
    }

    #[test]
    fn appending_a_line_does_not_mark_no_newline_at_eof() {
        let result = diff(b"hello\n", b"hello\nworld\n", DEFAULT_CONTEXT);
        let DiffResult::Text(hunks) = result else { panic!() };
        for line in hunks.iter().flat_map(|h| h.lines.iter()) {
            assert!(!line.no_newline_at_eof, "{line:?} should not be marked, both buffers end in a newline");
        }
    }

    #[test]
    fn binary_buffers_are_detected() {
        let mut buf = b"binary".to_vec();
        buf.push(0);
        let result = diff(&buf, b"other", DEFAULT_CONTEXT);
        assert_eq!(result, DiffResult::Binary);
    }

    #[test]
    fn distant_changes_produce_separate_hunks() {
        let old: Vec<u8> = (0..20).map(|n| format!("line{n}\n")).collect::<String>().into_bytes();
        let mut new_lines: Vec<String> = (0..20).map(|n| format!("line{n}")).collect();
        new_lines[0] = "CHANGED0".into();
        new_lines[19] = "CHANGED19".into();
        let new: Vec<u8> = new_lines.iter().map(|l| format!("{l}\n")).collect::<String>().into_bytes();
        let result = diff(&old, &new, DEFAULT_CONTEXT);
        let DiffResult::Text(hunks) = result else { panic!() };
        assert_eq!(hunks.len(), 2);
    }

    #[test]
    fn hunks_never_overlap() {
        let old = b"a\nb\nc\nd\ne\nf\ng\nh\ni\nj\n";
        let new = b"a\nB\nc\nd\ne\nf\ng\nh\nI\nj\n";
        let DiffResult::Text(hunks) = diff(old, new, 1) else { panic!() };
        for pair in hunks.windows(2) {
            assert!(pair[0].old_start + pair[0].old_count <= pair[1].old_start);
        }
    }

    #[test]
    fn rename_detection_pairs_similar_content() {
        let removed = vec![("old/a.txt".to_string(), b"one\ntwo\nthree\n".as_slice())];
        let added = vec![("new/a.txt".to_string(), b"one\ntwo\nthree\nfour\n".as_slice())];
        let renames = detect_renames(&removed, &added, DEFAULT_RENAME_THRESHOLD);
        assert_eq!(renames.len(), 1);
        assert_eq!(renames[0].old_path, "old/a.txt");
        assert_eq!(renames[0].new_path, "new/a.txt");
    }

    #[test]
    fn rename_detection_rejects_dissimilar_content() {
        let removed = vec![("a.txt".to_string(), b"completely different content here".as_slice())];
        let added = vec![("b.txt".to_string(), b"nothing at all alike, really".as_slice())];
        let renames = detect_renames(&removed, &added, DEFAULT_RENAME_THRESHOLD);
        assert!(renames.is_empty());
    }
}
