use mr_core::{DiffKind, DiffResult};

use crate::summarizer::SummaryRequest;

const MAX_SEGMENTS: usize = 3;
const MAX_SEGMENT_WORDS: usize = 12;

/// Deterministic template summary built only from diff counts and segments.
#[derive(Debug, Clone, Default)]
pub struct RuleModel;

struct Segment<'a> {
    side: &'a str,
    words: &'a [String],
}

impl RuleModel {
    pub fn new() -> Self {
        Self
    }

    pub fn summarize(&self, request: &SummaryRequest<'_>) -> String {
        let mut out = String::from("Mandela Report (rule-based):\n");
        out.push_str(&format!("- Subject: {}\n", request.url));

        if request.diffs.is_empty() {
            out.push_str("- No snapshots were available to compare; only the live page was captured.\n");
            return out;
        }

        let spans = request
            .diffs
            .iter()
            .map(|d| format!("{} vs {}", d.base_label, d.compare_label))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!("- Spans compared: {}\n", spans));

        for diff in request.diffs {
            out.push_str(&Self::describe(diff));
        }

        let first = &request.diffs[0];
        let delta = first.base_words().len() as i64 - first.compare_words().len() as i64;
        let sign = if delta >= 0 { "increased" } else { "decreased" };
        out.push_str(&format!(
            "- Overall word count {} by {} words ({} -> {}).\n",
            sign,
            delta.abs(),
            first.compare_label,
            first.base_label
        ));

        let segments = Self::largest_segments(request.diffs);
        if !segments.is_empty() {
            out.push_str("- Largest changed segments:\n");
            for segment in segments {
                out.push_str(&format!(
                    "  * only in {} ({} words): \"{}\"\n",
                    segment.side,
                    segment.words.len(),
                    Self::excerpt(segment.words)
                ));
            }
        }
        out
    }

    fn describe(diff: &DiffResult) -> String {
        if diff.is_unchanged() {
            return format!(
                "- {} vs {}: no word-level changes.\n",
                diff.base_label, diff.compare_label
            );
        }
        let stats = diff.stats();
        format!(
            "- {} vs {}: {} words only in {}, {} words only in {}; {:.0}% changed{}.\n",
            diff.base_label,
            diff.compare_label,
            diff.count(DiffKind::Delete),
            diff.base_label,
            diff.count(DiffKind::Insert),
            diff.compare_label,
            stats.ratio * 100.0,
            if diff.truncated { " (input truncated)" } else { "" }
        )
    }

    fn largest_segments(diffs: &[DiffResult]) -> Vec<Segment<'_>> {
        let mut segments: Vec<Segment<'_>> = diffs
            .iter()
            .flat_map(|diff| {
                diff.ops.iter().filter_map(move |op| match op.kind {
                    DiffKind::Equal => None,
                    DiffKind::Delete => Some(Segment {
                        side: &diff.base_label,
                        words: &op.words,
                    }),
                    DiffKind::Insert => Some(Segment {
                        side: &diff.compare_label,
                        words: &op.words,
                    }),
                })
            })
            .collect();
        // stable: equal sizes keep diff order
        segments.sort_by(|a, b| b.words.len().cmp(&a.words.len()));
        segments.truncate(MAX_SEGMENTS);
        segments
    }

    fn excerpt(words: &[String]) -> String {
        let mut text = words
            .iter()
            .take(MAX_SEGMENT_WORDS)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        if words.len() > MAX_SEGMENT_WORDS {
            text.push_str(" ...");
        }
        text
    }
}
