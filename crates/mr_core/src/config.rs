use clap::{ArgAction, Args};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::ProviderPreference;
use crate::{Error, Result};

pub const DEFAULT_USER_AGENT: &str = "MandelaReport/0.1 (+mailto:you@example.com)";

/// Word cap per diff side; the alignment table is `(n+1)*(m+1)` u16 cells.
pub const MAX_DIFF_WORDS: usize = 10_000;
pub const MAX_DAYS: i64 = 36_500;
pub const MAX_TIMEOUT_SECS: u64 = 3_600;
pub const MAX_INTERVAL_HOURS: u64 = 24 * 366;

/// Values consumed by the comparison pipeline and the retention task.
///
/// Every field can be given as a flag or as a `MANDELA_*` environment variable.
#[derive(Args, Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[arg(long, env = "MANDELA_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Per request timeout, in seconds
    #[arg(long, env = "MANDELA_REQUEST_TIMEOUT", default_value_t = 15)]
    pub request_timeout: u64,

    /// Response size cap, in megabytes
    #[arg(long, env = "MANDELA_MAX_RESPONSE_MB", default_value_t = 5)]
    pub max_response_mb: usize,

    /// Cut oversized bodies at the cap instead of rejecting them
    #[arg(long, env = "MANDELA_TRUNCATE_OVERSIZED", default_value_t = true, action = ArgAction::Set)]
    pub truncate_oversized: bool,

    #[arg(long, env = "MANDELA_OBEY_ROBOTS", default_value_t = true, action = ArgAction::Set)]
    pub obey_robots: bool,

    #[arg(long, env = "MANDELA_ALLOW_WAYBACK", default_value_t = true, action = ArgAction::Set)]
    pub allow_wayback: bool,

    #[arg(long, env = "MANDELA_SUMMARY_PROVIDER", value_enum, default_value_t = ProviderPreference::Auto)]
    pub summary_provider: ProviderPreference,

    /// Base URL of an OpenAI-compatible endpoint, e.g. http://llm:8085/v1
    #[arg(long, env = "MANDELA_LLM_BASE_URL")]
    pub llm_base_url: Option<String>,

    /// Bearer token for the LLM endpoint
    #[arg(long, env = "MANDELA_LLM_API_KEY", hide_env_values = true)]
    #[serde(skip_serializing, default)]
    pub llm_api_key: Option<String>,

    #[arg(long, env = "MANDELA_LLM_MODEL", default_value = "tinyllama-1.1b-chat")]
    pub llm_model: String,

    #[arg(long, env = "MANDELA_LLM_TIMEOUT", default_value_t = 30)]
    pub llm_timeout: u64,

    #[arg(long, env = "MANDELA_LLM_MAX_TOKENS", default_value_t = 400)]
    pub llm_max_tokens: u32,

    /// Refuse to start when the LLM is required but no endpoint is set
    #[arg(long, env = "MANDELA_STRICT_LLM", default_value_t = false, action = ArgAction::Set)]
    pub strict_llm: bool,

    #[arg(long, env = "MANDELA_RETENTION_ENABLED", default_value_t = true, action = ArgAction::Set)]
    pub retention_enabled: bool,

    #[arg(long, env = "MANDELA_RETENTION_DAYS", default_value_t = 180)]
    pub retention_days: i64,

    #[arg(long, env = "MANDELA_RETENTION_INTERVAL_HOURS", default_value_t = 24)]
    pub retention_interval_hours: u64,

    #[arg(long, env = "MANDELA_VACUUM_AFTER_PURGE", default_value_t = true, action = ArgAction::Set)]
    pub vacuum_after_purge: bool,

    /// Word cap per side before diff alignment
    #[arg(long, env = "MANDELA_MAX_DIFF_WORDS", default_value_t = 4000)]
    pub max_diff_words: usize,

    #[arg(long, env = "MANDELA_MAX_TEXT_CHARS", default_value_t = 80_000)]
    pub max_text_chars: usize,

    #[arg(long, env = "MANDELA_DEFAULT_SNAPSHOTS", default_value_t = 3)]
    pub default_snapshots: usize,

    /// Upper bound on snapshots when a date range is given without a count
    #[arg(long, env = "MANDELA_MAX_SNAPSHOTS", default_value_t = 10)]
    pub max_snapshots: usize,

    /// Archive gaps longer than this many days produce a notice
    #[arg(long, env = "MANDELA_GAP_DAYS", default_value_t = 90)]
    pub gap_days: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: 15,
            max_response_mb: 5,
            truncate_oversized: true,
            obey_robots: true,
            allow_wayback: true,
            summary_provider: ProviderPreference::Auto,
            llm_base_url: None,
            llm_api_key: None,
            llm_model: "tinyllama-1.1b-chat".to_string(),
            llm_timeout: 30,
            llm_max_tokens: 400,
            strict_llm: false,
            retention_enabled: true,
            retention_days: 180,
            retention_interval_hours: 24,
            vacuum_after_purge: true,
            max_diff_words: 4000,
            max_text_chars: 80_000,
            default_snapshots: 3,
            max_snapshots: 10,
            gap_days: 90,
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout)
    }

    pub fn max_response_bytes(&self) -> usize {
        self.max_response_mb.saturating_mul(1024 * 1024)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_hours.saturating_mul(3600))
    }

    /// Endpoint with surrounding whitespace and trailing slashes removed;
    /// a blank value counts as unset.
    pub fn llm_endpoint(&self) -> Option<String> {
        self.llm_base_url
            .as_deref()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
    }

    /// A blank key counts as unset.
    pub fn llm_api_key(&self) -> Option<String> {
        self.llm_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.request_timeout == 0, "request_timeout must be positive"),
            (self.request_timeout > MAX_TIMEOUT_SECS, "request_timeout is at most 3600 seconds"),
            (self.max_response_mb == 0, "max_response_mb must be positive"),
            (self.llm_timeout == 0, "llm_timeout must be positive"),
            (self.llm_timeout > MAX_TIMEOUT_SECS, "llm_timeout is at most 3600 seconds"),
            (self.retention_days <= 0, "retention_days must be positive"),
            (self.retention_days > MAX_DAYS, "retention_days is at most 36500"),
            (self.retention_interval_hours == 0, "retention_interval_hours must be positive"),
            (
                self.retention_interval_hours > MAX_INTERVAL_HOURS,
                "retention_interval_hours is at most 8784",
            ),
            (self.max_diff_words == 0, "max_diff_words must be positive"),
            (self.max_diff_words > MAX_DIFF_WORDS, "max_diff_words is at most 10000"),
            (self.default_snapshots == 0, "default_snapshots must be positive"),
            (self.max_snapshots == 0, "max_snapshots must be positive"),
            (self.gap_days < 0, "gap_days must not be negative"),
            (self.gap_days > MAX_DAYS, "gap_days is at most 36500"),
        ];
        if let Some((_, message)) = checks.iter().find(|(failed, _)| *failed) {
            return Err(Error::Config(message.to_string()));
        }
        if let Some(endpoint) = self.llm_endpoint() {
            let parsed = url::Url::parse(&endpoint)
                .map_err(|e| Error::Config(format!("llm_base_url {:?}: {}", endpoint, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(Error::Config(format!(
                    "llm_base_url must be http(s): {}",
                    endpoint
                )));
            }
        }
        Ok(())
    }
}
