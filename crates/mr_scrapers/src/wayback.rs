//! Wayback Machine capture discovery and snapshot selection.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use mr_core::{Result, SelectorError, Settings, SnapshotRef};

pub const CDX_ENDPOINT: &str = "https://web.archive.org/cdx/search/cdx";
const CDX_TIMESTAMP: &str = "%Y%m%d%H%M%S";
const PAGE_LIMIT: usize = 2000;
const MAX_PAGES: usize = 5;

/// Source of archived captures for a URL, oldest first.
#[async_trait]
pub trait ArchiveIndex: Send + Sync {
    async fn captures(
        &self,
        url: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> std::result::Result<Vec<SnapshotRef>, SelectorError>;
}

/// CDX API client. Only successful (200) captures are listed, and
/// consecutive captures with identical content are collapsed.
pub struct WaybackIndex {
    client: Client,
    endpoint: String,
    page_limit: usize,
    max_pages: usize,
}

impl WaybackIndex {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: CDX_ENDPOINT.to_string(),
            page_limit: PAGE_LIMIT,
            max_pages: MAX_PAGES,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(&settings.user_agent, settings.request_timeout())
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    async fn fetch_page(
        &self,
        url: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        resume_key: Option<&str>,
    ) -> std::result::Result<CdxPage, SelectorError> {
        let mut query: Vec<(&str, String)> = vec![
            ("url", url.to_string()),
            ("output", "json".to_string()),
            ("fl", "timestamp,original,statuscode".to_string()),
            ("filter", "statuscode:200".to_string()),
            ("collapse", "digest".to_string()),
            ("limit", self.page_limit.to_string()),
            ("showResumeKey", "true".to_string()),
        ];
        if let Some(since) = since {
            query.push(("from", since.format(CDX_TIMESTAMP).to_string()));
        }
        if let Some(until) = until {
            query.push(("to", until.format(CDX_TIMESTAMP).to_string()));
        }
        if let Some(key) = resume_key {
            query.push(("resumeKey", key.to_string()));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&query)
            .send()
            .await
            .map_err(|e| SelectorError::IndexUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SelectorError::IndexUnavailable(format!(
                "CDX query returned HTTP {}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SelectorError::IndexUnavailable(e.to_string()))?;
        parse_cdx(&body)
    }
}

#[async_trait]
impl ArchiveIndex for WaybackIndex {
    async fn captures(
        &self,
        url: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> std::result::Result<Vec<SnapshotRef>, SelectorError> {
        let mut captures = Vec::new();
        let mut resume_key: Option<String> = None;

        for page in 0..self.max_pages {
            let CdxPage { rows, resume_key: next } = self
                .fetch_page(url, since, until, resume_key.as_deref())
                .await?;
            debug!("🗄️ CDX page {} for {}: {} captures", page + 1, url, rows.len());
            captures.extend(rows);

            match next {
                Some(key) => resume_key = Some(key),
                None => break,
            }
        }

        captures.sort();
        captures.dedup_by(|a, b| a.timestamp == b.timestamp);
        info!("🗄️ {} archived captures for {}", captures.len(), url);
        Ok(captures)
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct CdxPage {
    pub rows: Vec<SnapshotRef>,
    pub resume_key: Option<String>,
}

/// Parse one `output=json` CDX page: a header row, capture rows, and
/// optionally an empty row followed by a one-element resume key row.
/// Rows with unreadable timestamps are dropped.
pub fn parse_cdx(body: &str) -> std::result::Result<CdxPage, SelectorError> {
    if body.trim().is_empty() {
        return Ok(CdxPage::default());
    }
    let value: Value =
        serde_json::from_str(body).map_err(|e| SelectorError::MalformedIndex(e.to_string()))?;
    let rows = value
        .as_array()
        .ok_or_else(|| SelectorError::MalformedIndex("expected a JSON array".to_string()))?;

    let mut page = CdxPage::default();
    let mut after_separator = false;
    for (i, row) in rows.iter().enumerate() {
        let fields = row
            .as_array()
            .ok_or_else(|| SelectorError::MalformedIndex(format!("row {} is not an array", i)))?;

        if fields.is_empty() {
            after_separator = true;
            continue;
        }
        if after_separator {
            page.resume_key = fields.first().and_then(Value::as_str).map(str::to_string);
            break;
        }

        let timestamp = fields.first().and_then(Value::as_str);
        let original = fields.get(1).and_then(Value::as_str);
        let (Some(timestamp), Some(original)) = (timestamp, original) else {
            continue;
        };
        if i == 0 && timestamp == "timestamp" {
            continue;
        }
        match parse_timestamp(timestamp) {
            Some(ts) => page.rows.push(SnapshotRef::wayback(ts, original)),
            None => debug!("Skipping CDX row with bad timestamp {:?}", timestamp),
        }
    }
    Ok(page)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, CDX_TIMESTAMP)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Pick `n` items spread evenly across `items`, keeping order.
///
/// Item `i` of the result is the element nearest the centre of the `i`th of
/// `n` equal buckets over the index range, halves rounding down. With `n`
/// at least the number of items everything is returned.
pub fn select_evenly<T: Clone>(items: &[T], n: usize) -> Vec<T> {
    let k = items.len();
    if n == 0 || k == 0 {
        return Vec::new();
    }
    if n >= k {
        return items.to_vec();
    }

    // centre of bucket i is (2i+1)(k-1) / 2n; exact integer rounding
    let q = 2 * n;
    (0..n)
        .map(|i| {
            let p = (2 * i + 1) * (k - 1);
            let index = (2 * p + q - 1) / (2 * q);
            items[index.min(k - 1)].clone()
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotQuery {
    pub url: String,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub count: Option<usize>,
}

impl SnapshotQuery {
    pub fn has_range(&self) -> bool {
        self.since.is_some() || self.until.is_some()
    }
}

/// Chooses which captures to compare.
///
/// * `count` given: that many evenly spaced captures from the range
/// * range only: every capture in range, thinned to `max_snapshots`
/// * neither: `default_snapshots` evenly spaced captures over all history
pub struct SnapshotSelector {
    index: Arc<dyn ArchiveIndex>,
    default_snapshots: usize,
    max_snapshots: usize,
}

impl SnapshotSelector {
    pub fn new(index: Arc<dyn ArchiveIndex>, default_snapshots: usize, max_snapshots: usize) -> Self {
        Self {
            index,
            default_snapshots,
            max_snapshots,
        }
    }

    pub fn from_settings(index: Arc<dyn ArchiveIndex>, settings: &Settings) -> Self {
        Self::new(index, settings.default_snapshots, settings.max_snapshots)
    }

    pub fn target_count(&self, query: &SnapshotQuery) -> usize {
        match query.count {
            Some(n) => n.min(self.max_snapshots),
            None if query.has_range() => self.max_snapshots,
            None => self.default_snapshots,
        }
    }

    pub async fn select(
        &self,
        query: &SnapshotQuery,
    ) -> std::result::Result<Vec<SnapshotRef>, SelectorError> {
        let mut captures = self
            .index
            .captures(&query.url, query.since, query.until)
            .await?;
        captures.sort();
        captures.retain(|c| {
            query.since.map_or(true, |since| c.timestamp >= since)
                && query.until.map_or(true, |until| c.timestamp <= until)
        });

        let selected = select_evenly(&captures, self.target_count(query));
        info!(
            "📸 Selected {} of {} captures for {}",
            selected.len(),
            captures.len(),
            query.url
        );
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, routing::get, Json, Router};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::collections::HashMap;

    #[test]
    fn test_select_evenly_picks_bucket_centres() {
        let items: Vec<u32> = (1..=10).collect();
        assert_eq!(select_evenly(&items, 3), vec![2, 5, 8]);
        assert_eq!(select_evenly(&items, 1), vec![5]);
        assert_eq!(select_evenly(&items, 2), vec![3, 8]);
    }

    #[test]
    fn test_select_evenly_edges() {
        let items: Vec<u32> = (1..=4).collect();
        assert_eq!(select_evenly(&items, 4), items);
        assert_eq!(select_evenly(&items, 9), items);
        assert!(select_evenly::<u32>(&[], 3).is_empty());
        assert!(select_evenly(&items, 0).is_empty());
        assert_eq!(select_evenly(&[42], 1), vec![42]);
    }

    #[test]
    fn test_select_evenly_is_ordered_and_distinct() {
        for k in 1..60usize {
            let items: Vec<usize> = (0..k).collect();
            for n in 1..=k {
                let picked = select_evenly(&items, n);
                assert_eq!(picked.len(), n);
                assert!(picked.windows(2).all(|w| w[0] < w[1]), "k={} n={}", k, n);
                assert_eq!(picked, select_evenly(&items, n));
            }
        }
    }

    #[test]
    fn test_parse_cdx_with_resume_key() {
        let body = r#"[
            ["timestamp","original","statuscode"],
            ["20200101000000","https://example.com/","200"],
            ["2021xx","https://example.com/","200"],
            ["20220315120000","https://example.com/","200"],
            [],
            ["com,example)/ 20220315120000"]
        ]"#;
        let page = parse_cdx(body).unwrap();
        assert_eq!(page.rows.len(), 2);
        assert_eq!(
            page.rows[0].timestamp,
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            page.rows[1].archive_url,
            "https://web.archive.org/web/20220315120000id_/https://example.com/"
        );
        assert_eq!(page.resume_key.as_deref(), Some("com,example)/ 20220315120000"));
    }

    #[test]
    fn test_parse_cdx_empty_and_malformed() {
        assert_eq!(parse_cdx("").unwrap(), CdxPage::default());
        assert_eq!(parse_cdx("[]").unwrap(), CdxPage::default());
        assert!(matches!(parse_cdx("<html>"), Err(SelectorError::MalformedIndex(_))));
        assert!(matches!(parse_cdx("{\"a\":1}"), Err(SelectorError::MalformedIndex(_))));
    }

    struct FixedIndex(Vec<SnapshotRef>);

    #[async_trait]
    impl ArchiveIndex for FixedIndex {
        async fn captures(
            &self,
            _url: &str,
            _since: Option<DateTime<Utc>>,
            _until: Option<DateTime<Utc>>,
        ) -> std::result::Result<Vec<SnapshotRef>, SelectorError> {
            Ok(self.0.clone())
        }
    }

    fn yearly(n: i32) -> Vec<SnapshotRef> {
        (0..n)
            .map(|i| {
                SnapshotRef::wayback(
                    Utc.with_ymd_and_hms(2010 + i, 6, 1, 0, 0, 0).unwrap(),
                    "https://example.com/",
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_selector_modes() {
        let selector = SnapshotSelector::new(Arc::new(FixedIndex(yearly(10))), 3, 5);

        let default = selector
            .select(&SnapshotQuery { url: "https://example.com/".into(), ..Default::default() })
            .await
            .unwrap();
        let years: Vec<String> = default.iter().map(|s| s.timestamp.format("%Y").to_string()).collect();
        assert_eq!(years, vec!["2011", "2014", "2017"]);

        let since = Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap();
        let ranged = selector
            .select(&SnapshotQuery {
                url: "https://example.com/".into(),
                since: Some(since),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(ranged.len(), 5);
        assert!(ranged.iter().all(|s| s.timestamp >= since));

        let counted = selector
            .select(&SnapshotQuery {
                url: "https://example.com/".into(),
                count: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(counted.len(), 2);
    }

    #[tokio::test]
    async fn test_wayback_index_paginates() {
        let app = Router::new().route(
            "/cdx",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(params.get("output").map(String::as_str), Some("json"));
                assert_eq!(params.get("filter").map(String::as_str), Some("statuscode:200"));
                let body = match params.get("resumeKey").map(String::as_str) {
                    None => serde_json::json!([
                        ["timestamp", "original", "statuscode"],
                        ["20190101000000", "https://example.com/", "200"],
                        [],
                        ["page-2"]
                    ]),
                    Some("page-2") => serde_json::json!([
                        ["timestamp", "original", "statuscode"],
                        ["20180101000000", "https://example.com/", "200"]
                    ]),
                    Some(_) => serde_json::json!([]),
                };
                Json(body)
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let index = WaybackIndex::new("MandelaReport-test/0.1", std::time::Duration::from_secs(5))
            .unwrap()
            .with_endpoint(&format!("http://{}/cdx", addr));
        let captures = index
            .captures("https://example.com/", Some(Utc::now() - ChronoDuration::days(36500)), None)
            .await
            .unwrap();

        assert_eq!(captures.len(), 2);
        assert!(captures[0].timestamp < captures[1].timestamp);
    }

    #[tokio::test]
    async fn test_wayback_index_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let index = WaybackIndex::new("MandelaReport-test/0.1", std::time::Duration::from_secs(2))
            .unwrap()
            .with_endpoint(&format!("http://{}/cdx", addr));
        let err = index.captures("https://example.com/", None, None).await.unwrap_err();
        assert!(matches!(err, SelectorError::IndexUnavailable(_)));
    }
}
