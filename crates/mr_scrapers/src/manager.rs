use chrono::{DateTime, Utc};
use std::sync::Arc;
use url::Url;

use mr_core::logging::Logger;
use mr_core::{
    DiffResult, Error, ExtractedDoc, LiveFetch, ProviderPreference, Report, ReportStorage,
    Result, Settings, SnapshotFailure, SnapshotRef,
};
use mr_inference::{DiffEngine, Summarizer, SummaryRequest};

use crate::extract::Extractor;
use crate::fetch::{FetchPolicy, HttpFetcher, LiveFetcher, SnapshotFetcher};
use crate::wayback::{ArchiveIndex, SnapshotQuery, SnapshotSelector, WaybackIndex};

/// One comparison to run. Unset fields fall back to settings.
#[derive(Debug, Clone, Default)]
pub struct ComparisonRequest {
    pub url: String,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub snapshots: Option<usize>,
    pub provider: Option<ProviderPreference>,
}

impl ComparisonRequest {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::default()
        }
    }
}

/// Runs the fetch → extract → diff → summarize → persist pipeline.
///
/// Holds no per-request state, so concurrent `compare` calls are
/// independent.
pub struct ComparisonManager {
    settings: Settings,
    storage: Arc<dyn ReportStorage>,
    summarizer: Arc<Summarizer>,
    live: LiveFetcher,
    archive: SnapshotFetcher,
    selector: SnapshotSelector,
    extractor: Extractor,
    engine: DiffEngine,
}

impl ComparisonManager {
    pub fn new(
        settings: Settings,
        storage: Arc<dyn ReportStorage>,
        summarizer: Arc<Summarizer>,
        index: Arc<dyn ArchiveIndex>,
    ) -> Result<Self> {
        settings.validate()?;
        let http = HttpFetcher::new(FetchPolicy::from_settings(&settings))?;
        Ok(Self {
            live: LiveFetcher::from_settings(&settings)?,
            archive: SnapshotFetcher::new(http),
            selector: SnapshotSelector::from_settings(index, &settings),
            extractor: Extractor::new(settings.max_text_chars),
            engine: DiffEngine::new(settings.max_diff_words),
            settings,
            storage,
            summarizer,
        })
    }

    /// Production wiring: Wayback CDX index and the configured summarizer.
    pub fn from_settings(settings: Settings, storage: Arc<dyn ReportStorage>) -> Result<Self> {
        let summarizer = Arc::new(Summarizer::from_settings(&settings)?);
        let index: Arc<dyn ArchiveIndex> = Arc::new(WaybackIndex::from_settings(&settings)?);
        Self::new(settings, storage, summarizer, index)
    }

    pub async fn get_report(&self, id: &str) -> Result<Report> {
        self.storage.get_report(id).await
    }

    pub async fn compare(&self, request: ComparisonRequest) -> Result<Report> {
        let url = validate(&request)?;
        let id = Report::new_id();
        let logger = Logger::new().with_prefix(format!("[{}]", &id[..8]));
        logger.info(&format!("🔎 Comparing {}", url));

        let live = match self.live.fetch(&url).await? {
            LiveFetch::Fetched(result) => result.require_html()?,
            LiveFetch::Skipped { reason } => {
                logger.warn(&format!("🤖 Skipped: {}", reason));
                return Err(Error::Skipped(reason));
            }
        };

        let mut notices = Vec::new();
        if live.truncated {
            notices.push(format!(
                "Live page exceeded {} bytes; only the first {} bytes were compared.",
                self.settings.max_response_bytes(),
                live.raw_bytes.len()
            ));
        }
        let live_doc =
            self.extractor
                .extract(ExtractedDoc::LIVE_LABEL, &live.raw_bytes, &live.content_type)?;
        logger.info(&format!("📄 Live page: {} words", live_doc.word_count));

        let selected = self.select_snapshots(&request, &url, &logger, &mut notices).await;
        let (snapshot_docs, failures) = self.collect_snapshots(&selected, &logger).await;

        let (diffs, historical_diff) = self.diff_all(&live_doc, &snapshot_docs).await?;

        let now = Utc::now();
        notices.extend(self.gap_notices(&request, &snapshot_docs, now));
        if !failures.is_empty() {
            notices.push(format!(
                "{} of {} archived captures could not be compared.",
                failures.len(),
                selected.len()
            ));
        }
        let live_only = diffs.is_empty();
        if live_only {
            notices.push(
                "No archived captures could be compared; this report contains the live page only."
                    .to_string(),
            );
        }

        let mut summarized = diffs.clone();
        summarized.extend(historical_diff.iter().cloned());
        let preference = request.provider.unwrap_or_else(|| self.summarizer.preference());
        let summary = self
            .summarizer
            .summarize_with(&SummaryRequest { url: &url, diffs: &summarized }, preference)
            .await;
        if summary.degraded {
            notices.push("LLM summary unavailable; used the rule-based summary instead.".to_string());
        }

        let report = Report {
            id,
            url,
            created_at: now,
            live_doc,
            snapshot_docs: snapshot_docs.into_iter().map(|(_, doc)| doc).collect(),
            diffs,
            historical_diff,
            failures,
            notices,
            live_only,
            summary,
            ttl_expires_at: expiry(now, self.settings.retention())?,
        };

        self.storage.create_report(&report).await?;
        logger.info(&format!(
            "💾 Stored report ({} snapshots, {} failures, {} summary)",
            report.snapshot_docs.len(),
            report.failures.len(),
            report.summary.provider_used
        ));
        Ok(report)
    }

    /// Live against each capture, then earliest against latest. Alignment
    /// is quadratic, so it runs on the blocking pool.
    async fn diff_all(
        &self,
        live: &ExtractedDoc,
        docs: &[(SnapshotRef, ExtractedDoc)],
    ) -> Result<(Vec<DiffResult>, Option<DiffResult>)> {
        let engine = self.engine.clone();
        let base = (live.source_label.clone(), live.text.clone());
        let captures: Vec<(String, String)> = docs
            .iter()
            .map(|(_, doc)| (doc.source_label.clone(), doc.text.clone()))
            .collect();

        tokio::task::spawn_blocking(move || {
            let diffs = captures
                .iter()
                .map(|(label, text)| engine.diff(&base.0, &base.1, label, text))
                .collect();
            let historical = match (captures.first(), captures.last()) {
                (Some(earliest), Some(latest)) if captures.len() >= 2 => {
                    Some(engine.diff(&earliest.0, &earliest.1, &latest.0, &latest.1))
                }
                _ => None,
            };
            (diffs, historical)
        })
        .await
        .map_err(|e| Error::Inference(format!("diff worker failed: {}", e)))
    }

    async fn select_snapshots(
        &self,
        request: &ComparisonRequest,
        url: &str,
        logger: &Logger,
        notices: &mut Vec<String>,
    ) -> Vec<SnapshotRef> {
        if !self.settings.allow_wayback {
            notices.push("Archive lookups are disabled.".to_string());
            return Vec::new();
        }

        let query = SnapshotQuery {
            url: url.to_string(),
            since: request.since,
            until: request.until,
            count: request.snapshots,
        };
        match self.selector.select(&query).await {
            Ok(selected) => {
                if selected.is_empty() {
                    notices.push("No archived captures were found for the requested range.".to_string());
                }
                selected
            }
            Err(e) => {
                logger.warn(&format!("⚠️ Archive index failed: {}", e));
                notices.push(format!("Archive index could not be queried: {}", e));
                Vec::new()
            }
        }
    }

    /// Fetch and extract every selected capture; failures are recorded and
    /// the rest continue. Successful captures stay in chronological order.
    async fn collect_snapshots(
        &self,
        selected: &[SnapshotRef],
        logger: &Logger,
    ) -> (Vec<(SnapshotRef, ExtractedDoc)>, Vec<SnapshotFailure>) {
        let mut docs = Vec::new();
        let mut failures = Vec::new();

        for (snapshot, result) in self.archive.fetch_all(selected).await {
            let doc = result
                .and_then(|fetched| fetched.require_html())
                .map_err(Error::from)
                .and_then(|fetched| {
                    self.extractor
                        .extract(&snapshot.label(), &fetched.raw_bytes, &fetched.content_type)
                        .map_err(Error::from)
                });

            match doc {
                Ok(doc) => docs.push((snapshot, doc)),
                Err(e) => {
                    logger.warn(&format!("⚠️ Capture {} dropped: {}", snapshot.label(), e));
                    failures.push(SnapshotFailure {
                        timestamp: snapshot.timestamp,
                        archive_url: snapshot.archive_url.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        (docs, failures)
    }

    fn gap_notices(
        &self,
        request: &ComparisonRequest,
        docs: &[(SnapshotRef, ExtractedDoc)],
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let gap = chrono::Duration::days(self.settings.gap_days);
        let mut notices = Vec::new();

        if let (Some(since), Some((earliest, _))) = (request.since, docs.first()) {
            if earliest.timestamp - since > gap {
                notices.push(format!(
                    "Earliest archived capture is {} ({} days after the requested start {}).",
                    earliest.timestamp.format("%Y-%m-%d"),
                    (earliest.timestamp - since).num_days(),
                    since.format("%Y-%m-%d")
                ));
            }
        }
        if let Some((latest, _)) = docs.last() {
            let until = request.until.unwrap_or(now);
            if until - latest.timestamp > gap {
                notices.push(format!(
                    "Latest archived capture is {} ({} days before the requested end {}).",
                    latest.timestamp.format("%Y-%m-%d"),
                    (until - latest.timestamp).num_days(),
                    until.format("%Y-%m-%d")
                ));
            }
        }
        notices
    }
}

fn expiry(now: DateTime<Utc>, retention: chrono::Duration) -> Result<DateTime<Utc>> {
    now.checked_add_signed(retention).ok_or_else(|| {
        Error::Config(format!("retention of {} days is out of range", retention.num_days()))
    })
}

fn validate(request: &ComparisonRequest) -> Result<String> {
    let url = request.url.trim();
    let parsed = Url::parse(url)
        .map_err(|e| Error::InvalidRequest(format!("invalid URL {:?}: {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(Error::InvalidRequest(format!(
            "URL must be absolute http(s): {}",
            url
        )));
    }
    if let (Some(since), Some(until)) = (request.since, request.until) {
        if since > until {
            return Err(Error::InvalidRequest(format!(
                "since ({}) is after until ({})",
                since.format("%Y-%m-%d"),
                until.format("%Y-%m-%d")
            )));
        }
    }
    if request.snapshots == Some(0) {
        return Err(Error::InvalidRequest("snapshot count must be at least 1".to_string()));
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_validate_request() {
        assert!(validate(&ComparisonRequest::new("https://example.com/")).is_ok());
        assert_eq!(
            validate(&ComparisonRequest::new("  http://example.com/a  ")).unwrap(),
            "http://example.com/a"
        );

        for bad in ["", "example.com", "ftp://example.com/", "file:///etc/passwd", "mailto:a@b.c"] {
            assert!(
                matches!(validate(&ComparisonRequest::new(bad)), Err(Error::InvalidRequest(_))),
                "{:?} should be rejected",
                bad
            );
        }

        let inverted = ComparisonRequest {
            since: Some(Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap()),
            until: Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
            ..ComparisonRequest::new("https://example.com/")
        };
        assert!(matches!(validate(&inverted), Err(Error::InvalidRequest(_))));

        let zero = ComparisonRequest {
            snapshots: Some(0),
            ..ComparisonRequest::new("https://example.com/")
        };
        assert!(matches!(validate(&zero), Err(Error::InvalidRequest(_))));
    }

    fn doc(label: &str, text: &str) -> ExtractedDoc {
        ExtractedDoc {
            source_label: label.to_string(),
            title: None,
            text: text.to_string(),
            word_count: text.split_whitespace().count(),
            extracted_at: Utc::now(),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_diff_all_on_blocking_pool() {
        let settings = Settings::default();
        let manager = ComparisonManager::new(
            settings.clone(),
            Arc::new(mr_storage::MemoryStorage::new()),
            Arc::new(Summarizer::new(
                None,
                ProviderPreference::Rule,
                std::time::Duration::from_secs(1),
            )),
            Arc::new(WaybackIndex::from_settings(&settings).unwrap()),
        )
        .unwrap();

        let captures: Vec<_> = [(2020, "the dog sat"), (2022, "the dog sat down")]
            .into_iter()
            .map(|(year, text)| {
                let snapshot = SnapshotRef::wayback(
                    Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap(),
                    "https://example.com/",
                );
                let label = snapshot.label();
                (snapshot, doc(&label, text))
            })
            .collect();

        let (diffs, historical) = manager
            .diff_all(&doc(ExtractedDoc::LIVE_LABEL, "the cat sat"), &captures)
            .await
            .unwrap();
        assert_eq!(diffs.len(), 2);
        assert!(diffs.iter().all(|d| d.base_label == ExtractedDoc::LIVE_LABEL));
        assert_eq!(diffs[1].compare_label, "2022-01-01T00:00:00+00:00");
        let historical = historical.unwrap();
        assert_eq!(historical.base_label, "2020-01-01T00:00:00+00:00");
        assert_eq!(historical.compare_words(), vec!["the", "dog", "sat", "down"]);

        let (diffs, historical) = manager
            .diff_all(&doc(ExtractedDoc::LIVE_LABEL, "x"), &captures[..1])
            .await
            .unwrap();
        assert_eq!(diffs.len(), 1);
        assert!(historical.is_none());
    }

    #[test]
    fn test_expiry_is_checked() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            expiry(now, chrono::Duration::days(180)).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 29, 0, 0, 0).unwrap()
        );
        assert!(matches!(
            expiry(now, chrono::Duration::days(1_000_000_000)),
            Err(Error::Config(_))
        ));
    }
}
