use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FetchError;

/// Raw response captured by the fetch stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    pub url: String,
    pub status_code: u16,
    #[serde(skip)]
    pub raw_bytes: Vec<u8>,
    pub content_type: String,
    pub fetched_at: DateTime<Utc>,
    /// Body exceeded the size cap and was cut to exactly the cap.
    pub truncated: bool,
}

impl FetchResult {
    pub fn is_html(&self) -> bool {
        let ct = self.content_type.to_ascii_lowercase();
        ct.contains("text/html") || ct.contains("application/xhtml+xml")
    }

    /// Non-HTML responses are kept for the record but never reach extraction.
    pub fn require_html(self) -> std::result::Result<Self, FetchError> {
        if self.is_html() {
            Ok(self)
        } else {
            Err(FetchError::NonHtml {
                url: self.url,
                content_type: self.content_type,
            })
        }
    }
}

#[derive(Debug, Clone)]
pub enum LiveFetch {
    Fetched(FetchResult),
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub timestamp: DateTime<Utc>,
    pub original_url: String,
    pub archive_url: String,
}

impl SnapshotRef {
    pub const WAYBACK_BASE: &'static str = "https://web.archive.org/web";

    /// Builds a reference from a CDX capture; `archive_url` points at the
    /// unmodified capture (`id_` flag) so no replay toolbar gets extracted.
    pub fn wayback(timestamp: DateTime<Utc>, original_url: &str) -> Self {
        Self {
            archive_url: format!(
                "{}/{}id_/{}",
                Self::WAYBACK_BASE,
                timestamp.format("%Y%m%d%H%M%S"),
                original_url
            ),
            timestamp,
            original_url: original_url.to_string(),
        }
    }

    pub fn label(&self) -> String {
        self.timestamp.to_rfc3339()
    }

    pub fn view_url(&self) -> String {
        format!(
            "{}/{}/{}",
            Self::WAYBACK_BASE,
            self.timestamp.format("%Y%m%d%H%M%S"),
            self.original_url
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDoc {
    pub source_label: String,
    pub title: Option<String>,
    pub text: String,
    pub word_count: usize,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractedDoc {
    pub const LIVE_LABEL: &'static str = "live";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Equal,
    Insert,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffOp {
    pub kind: DiffKind,
    pub words: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiffStats {
    pub total_tokens: usize,
    pub changed_tokens: usize,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    pub base_label: String,
    pub compare_label: String,
    pub ops: Vec<DiffOp>,
    /// One or both inputs exceeded the word cap and were cut before alignment.
    pub truncated: bool,
}

impl DiffResult {
    /// Words of the base side (`equal` + `delete`).
    pub fn base_words(&self) -> Vec<&str> {
        self.side_words(DiffKind::Delete)
    }

    /// Words of the compare side (`equal` + `insert`).
    pub fn compare_words(&self) -> Vec<&str> {
        self.side_words(DiffKind::Insert)
    }

    fn side_words(&self, changed: DiffKind) -> Vec<&str> {
        self.ops
            .iter()
            .filter(|op| op.kind == DiffKind::Equal || op.kind == changed)
            .flat_map(|op| op.words.iter().map(String::as_str))
            .collect()
    }

    pub fn count(&self, kind: DiffKind) -> usize {
        self.ops
            .iter()
            .filter(|op| op.kind == kind)
            .map(|op| op.words.len())
            .sum()
    }

    pub fn is_unchanged(&self) -> bool {
        self.ops.iter().all(|op| op.kind == DiffKind::Equal)
    }

    /// Change statistics. A changed region (deletes followed by inserts)
    /// counts as the larger of its two sides.
    pub fn stats(&self) -> DiffStats {
        let base = self.count(DiffKind::Equal) + self.count(DiffKind::Delete);
        let compare = self.count(DiffKind::Equal) + self.count(DiffKind::Insert);

        let mut changed = 0;
        let (mut deleted, mut inserted) = (0, 0);
        for op in &self.ops {
            match op.kind {
                DiffKind::Equal => {
                    changed += deleted.max(inserted);
                    deleted = 0;
                    inserted = 0;
                }
                DiffKind::Delete => deleted += op.words.len(),
                DiffKind::Insert => inserted += op.words.len(),
            }
        }
        changed += deleted.max(inserted);

        let total = base.max(compare).max(1);
        DiffStats {
            total_tokens: total,
            changed_tokens: changed,
            ratio: (changed as f64 / total as f64).clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryProvider {
    Llm,
    Rule,
}

impl fmt::Display for SummaryProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SummaryProvider::Llm => write!(f, "llm"),
            SummaryProvider::Rule => write!(f, "rule"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub text: String,
    pub provider_used: SummaryProvider,
    /// The LLM was wanted but the rule template produced this text.
    pub degraded: bool,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPreference {
    #[default]
    Auto,
    Llm,
    Rule,
}

impl FromStr for ProviderPreference {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "llm" => Ok(Self::Llm),
            "rule" => Ok(Self::Rule),
            other => Err(crate::Error::Config(format!(
                "Unknown summary provider: {} (expected auto|llm|rule)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFailure {
    pub timestamp: DateTime<Utc>,
    pub archive_url: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub live_doc: ExtractedDoc,
    pub snapshot_docs: Vec<ExtractedDoc>,
    /// Live page (base) against each snapshot (compare), in snapshot order.
    pub diffs: Vec<DiffResult>,
    /// Earliest against latest snapshot when at least two were retrieved.
    pub historical_diff: Option<DiffResult>,
    pub failures: Vec<SnapshotFailure>,
    pub notices: Vec<String>,
    /// No snapshot could be compared; `diffs` is empty.
    pub live_only: bool,
    pub summary: SummaryResult,
    pub ttl_expires_at: DateTime<Utc>,
}

impl Report {
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ttl_expires_at < now
    }
}
