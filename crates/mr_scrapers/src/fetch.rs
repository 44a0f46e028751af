use chrono::Utc;
use futures::future::join_all;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::{debug, info, warn};

use mr_core::{FetchError, FetchResult, LiveFetch, Result, Settings, SnapshotRef};

use crate::robots::RobotsGate;

const MAX_REDIRECTS: usize = 5;

/// Limits applied to every outbound page request.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_bytes: usize,
    /// Cut oversized bodies to `max_bytes` instead of failing with `TooLarge`.
    pub truncate_oversized: bool,
}

impl FetchPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            user_agent: settings.user_agent.clone(),
            timeout: settings.request_timeout(),
            max_bytes: settings.max_response_bytes(),
            truncate_oversized: settings.truncate_oversized,
        }
    }
}

/// Bounded GET shared by the live and archive fetchers.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    policy: FetchPolicy,
}

impl HttpFetcher {
    pub fn new(policy: FetchPolicy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&policy.user_agent)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Self { client, policy })
    }

    /// The timeout covers the whole exchange including the body read.
    pub async fn fetch(&self, url: &str) -> std::result::Result<FetchResult, FetchError> {
        match tokio::time::timeout(self.policy.timeout, self.fetch_unbounded(url)).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error(url)),
        }
    }

    async fn fetch_unbounded(&self, url: &str) -> std::result::Result<FetchResult, FetchError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = content_type(&response);
        let limit = self.policy.max_bytes;
        if !self.policy.truncate_oversized
            && response.content_length().map_or(false, |len| len as usize > limit)
        {
            return Err(FetchError::TooLarge {
                url: url.to_string(),
                limit,
            });
        }

        let final_url = response.url().to_string();
        let mut body = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.transport_error(url, e))?
        {
            let remaining = limit - body.len();
            if chunk.len() > remaining {
                if !self.policy.truncate_oversized {
                    return Err(FetchError::TooLarge {
                        url: url.to_string(),
                        limit,
                    });
                }
                body.extend_from_slice(&chunk[..remaining]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        if truncated {
            warn!("✂️ Truncated {} at {} bytes", url, limit);
        }
        debug!("📥 {} bytes from {} ({})", body.len(), final_url, content_type);

        Ok(FetchResult {
            url: final_url,
            status_code: status.as_u16(),
            raw_bytes: body,
            content_type,
            fetched_at: Utc::now(),
            truncated,
        })
    }

    fn timeout_error(&self, url: &str) -> FetchError {
        FetchError::Timeout {
            url: url.to_string(),
            secs: self.policy.timeout.as_secs(),
        }
    }

    fn transport_error(&self, url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            self.timeout_error(url)
        } else {
            FetchError::Connection {
                url: url.to_string(),
                message: e.to_string(),
            }
        }
    }
}

fn content_type(response: &Response) -> String {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Fetches the current page, consulting robots.txt first when enabled.
#[derive(Clone)]
pub struct LiveFetcher {
    http: HttpFetcher,
    robots: Option<RobotsGate>,
}

impl LiveFetcher {
    pub fn new(http: HttpFetcher, robots: Option<RobotsGate>) -> Self {
        Self { http, robots }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let http = HttpFetcher::new(FetchPolicy::from_settings(settings))?;
        let robots = if settings.obey_robots {
            Some(RobotsGate::new(&settings.user_agent, settings.request_timeout())?)
        } else {
            None
        };
        Ok(Self::new(http, robots))
    }

    pub async fn fetch(&self, url: &str) -> std::result::Result<LiveFetch, FetchError> {
        if let Some(robots) = &self.robots {
            if !robots.is_allowed(url).await {
                info!("🤖 robots.txt disallows {}", url);
                return Ok(LiveFetch::Skipped {
                    reason: format!("robots.txt disallows fetching {}", url),
                });
            }
        }
        let result = self.http.fetch(url).await?;
        info!("🌐 Fetched live page {} ({} bytes)", url, result.raw_bytes.len());
        Ok(LiveFetch::Fetched(result))
    }
}

/// Retrieves archived captures concurrently. Results come back in input
/// order, one per reference.
#[derive(Clone)]
pub struct SnapshotFetcher {
    http: HttpFetcher,
}

impl SnapshotFetcher {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }

    pub async fn fetch(&self, snapshot: &SnapshotRef) -> std::result::Result<FetchResult, FetchError> {
        self.http.fetch(&snapshot.archive_url).await
    }

    pub async fn fetch_all(
        &self,
        snapshots: &[SnapshotRef],
    ) -> Vec<(SnapshotRef, std::result::Result<FetchResult, FetchError>)> {
        let fetches = snapshots.iter().map(|snapshot| async move {
            let result = self.fetch(snapshot).await;
            match &result {
                Ok(r) => debug!("🗄️ Capture {} fetched ({} bytes)", snapshot.label(), r.raw_bytes.len()),
                Err(e) => warn!("⚠️ Capture {} failed: {}", snapshot.label(), e),
            }
            (snapshot.clone(), result)
        });
        join_all(fetches).await
    }
}
