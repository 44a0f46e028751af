//! Word-level alignment between two extracted texts.
//!
//! Texts are split on whitespace, cut to a word cap, stripped of their
//! common prefix and suffix, and the remaining middle is aligned with a
//! longest-common-subsequence table. Within a changed region deletions are
//! always emitted before insertions.

use mr_core::{DiffKind, DiffOp, DiffResult};

pub const DEFAULT_MAX_WORDS: usize = 4000;

/// Bounds both the `u16` cells and the table size.
pub const MAX_WORDS_LIMIT: usize = mr_core::config::MAX_DIFF_WORDS;

#[derive(Debug, Clone)]
pub struct DiffEngine {
    max_words: usize,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORDS)
    }
}

impl DiffEngine {
    pub fn new(max_words: usize) -> Self {
        Self {
            max_words: max_words.clamp(1, MAX_WORDS_LIMIT),
        }
    }

    pub fn max_words(&self) -> usize {
        self.max_words
    }

    pub fn diff(
        &self,
        base_label: &str,
        base: &str,
        compare_label: &str,
        compare: &str,
    ) -> DiffResult {
        let mut base_words: Vec<&str> = base.split_whitespace().collect();
        let mut compare_words: Vec<&str> = compare.split_whitespace().collect();

        let truncated = base_words.len() > self.max_words || compare_words.len() > self.max_words;
        base_words.truncate(self.max_words);
        compare_words.truncate(self.max_words);

        DiffResult {
            base_label: base_label.to_string(),
            compare_label: compare_label.to_string(),
            ops: diff_words(&base_words, &compare_words),
            truncated,
        }
    }
}

/// Align two word sequences. The result is coalesced: no two adjacent ops
/// share a kind, and no op is empty.
pub fn diff_words(a: &[&str], b: &[&str]) -> Vec<DiffOp> {
    let mut ops = OpBuilder::default();

    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    ops.push_all(DiffKind::Equal, &a[..prefix]);
    align(&a[prefix..a.len() - suffix], &b[prefix..b.len() - suffix], &mut ops);
    ops.push_all(DiffKind::Equal, &a[a.len() - suffix..]);

    ops.finish()
}

fn align(a: &[&str], b: &[&str], ops: &mut OpBuilder) {
    if a.is_empty() || b.is_empty() {
        ops.push_all(DiffKind::Delete, a);
        ops.push_all(DiffKind::Insert, b);
        return;
    }

    let (n, m) = (a.len(), b.len());
    let width = m + 1;
    // lcs[i * width + j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![0u16; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i * width + j] = if a[i] == b[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            ops.push(DiffKind::Equal, a[i]);
            i += 1;
            j += 1;
        } else if lcs[(i + 1) * width + j] >= lcs[i * width + j + 1] {
            ops.push(DiffKind::Delete, a[i]);
            i += 1;
        } else {
            ops.push(DiffKind::Insert, b[j]);
            j += 1;
        }
    }
    ops.push_all(DiffKind::Delete, &a[i..]);
    ops.push_all(DiffKind::Insert, &b[j..]);
}

#[derive(Default)]
struct OpBuilder {
    ops: Vec<DiffOp>,
}

impl OpBuilder {
    fn push(&mut self, kind: DiffKind, word: &str) {
        match self.ops.last_mut() {
            Some(last) if last.kind == kind => last.words.push(word.to_string()),
            _ => self.ops.push(DiffOp {
                kind,
                words: vec![word.to_string()],
            }),
        }
    }

    fn push_all(&mut self, kind: DiffKind, words: &[&str]) {
        for word in words {
            self.push(kind, word);
        }
    }

    fn finish(self) -> Vec<DiffOp> {
        self.ops
    }
}
