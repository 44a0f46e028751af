//! Provider resolution and the never-failing summary path.
//!
//! A summary request moves through at most two states: it starts in
//! `RuleOnly` or `LlmAttempt` depending on the preference and whether an
//! endpoint is configured, and `LlmAttempt` falls into `DegradedFallback`
//! on any failure. Every terminal state yields a [`SummaryResult`].

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use mr_core::{
    CompletionModel, DiffKind, DiffResult, Error, ProviderPreference, Result, Settings,
    SummaryProvider, SummaryResult,
};

use crate::models::openai::OpenAiCompatModel;
use crate::models::rule::RuleModel;

const SYSTEM_PROMPT: &str = "Be precise, neutral, and helpful. Focus on how changes could lead \
to mismatched public memory (Mandela Effects).";

const MAX_PROMPT_CHARS: usize = 8000;

#[derive(Debug, Clone, Copy)]
pub struct SummaryRequest<'a> {
    pub url: &'a str,
    pub diffs: &'a [DiffResult],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryState {
    RuleOnly,
    LlmAttempt,
    DegradedFallback { reason: String },
}

pub struct Summarizer {
    model: Option<Arc<dyn CompletionModel>>,
    rule: RuleModel,
    preference: ProviderPreference,
    timeout: Duration,
}

impl Summarizer {
    pub fn new(
        model: Option<Arc<dyn CompletionModel>>,
        preference: ProviderPreference,
        timeout: Duration,
    ) -> Self {
        Self {
            model,
            rule: RuleModel::new(),
            preference,
            timeout,
        }
    }

    /// Build from settings. With `strict_llm`, requiring the LLM without an
    /// endpoint is rejected here so that summarizing itself never fails.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let endpoint = settings.llm_endpoint();
        if settings.strict_llm
            && settings.summary_provider == ProviderPreference::Llm
            && endpoint.is_none()
        {
            return Err(Error::Config(
                "summary_provider=llm with strict_llm requires llm_base_url".to_string(),
            ));
        }

        let model = match endpoint {
            Some(base_url) => {
                let model = OpenAiCompatModel::new(
                    &base_url,
                    &settings.llm_model,
                    settings.llm_max_tokens,
                    settings.llm_timeout(),
                )?
                .with_api_key(settings.llm_api_key());
                Some(Arc::new(model) as Arc<dyn CompletionModel>)
            }
            None => None,
        };
        Ok(Self::new(model, settings.summary_provider, settings.llm_timeout()))
    }

    pub fn preference(&self) -> ProviderPreference {
        self.preference
    }

    pub fn resolve(&self, preference: ProviderPreference) -> SummaryState {
        match (preference, self.model.is_some()) {
            (ProviderPreference::Rule, _) | (ProviderPreference::Auto, false) => {
                SummaryState::RuleOnly
            }
            (ProviderPreference::Auto, true) | (ProviderPreference::Llm, true) => {
                SummaryState::LlmAttempt
            }
            (ProviderPreference::Llm, false) => SummaryState::DegradedFallback {
                reason: "no LLM endpoint configured".to_string(),
            },
        }
    }

    pub async fn summarize(&self, request: &SummaryRequest<'_>) -> SummaryResult {
        self.summarize_with(request, self.preference).await
    }

    /// Summarize with a per-request preference override.
    pub async fn summarize_with(
        &self,
        request: &SummaryRequest<'_>,
        preference: ProviderPreference,
    ) -> SummaryResult {
        let mut state = self.resolve(preference);
        loop {
            state = match state {
                SummaryState::RuleOnly => {
                    debug!("📝 Rule-based summary for {}", request.url);
                    return SummaryResult {
                        text: self.rule.summarize(request),
                        provider_used: SummaryProvider::Rule,
                        degraded: false,
                    };
                }
                SummaryState::LlmAttempt => match self.attempt_llm(request).await {
                    Ok(text) => {
                        info!("🤖 LLM summary generated for {}", request.url);
                        return SummaryResult {
                            text,
                            provider_used: SummaryProvider::Llm,
                            degraded: false,
                        };
                    }
                    Err(reason) => SummaryState::DegradedFallback { reason },
                },
                SummaryState::DegradedFallback { reason } => {
                    warn!("⚠️ LLM unavailable ({}), falling back to rule-based summary", reason);
                    return SummaryResult {
                        text: self.rule.summarize(request),
                        provider_used: SummaryProvider::Rule,
                        degraded: true,
                    };
                }
            };
        }
    }

    async fn attempt_llm(&self, request: &SummaryRequest<'_>) -> std::result::Result<String, String> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| "no LLM endpoint configured".to_string())?;
        let prompt = build_prompt(request);
        match tokio::time::timeout(self.timeout, model.complete(SYSTEM_PROMPT, &prompt)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {}s", self.timeout.as_secs_f32())),
        }
    }
}

/// Prompt made of the changed segments only, capped at a fixed size.
pub fn build_prompt(request: &SummaryRequest<'_>) -> String {
    let mut prompt = String::from(
        "You are a concise change analyst. Given word-level changes between versions of a webpage,\n\
         summarize the key changes for a non-technical reader.\n\
         Focus on: new/removed sections, wording shifts affecting meaning\n\
         (dates, prices, policies), and metadata like titles or disclaimers.\n\
         Write 5-10 bullet points and a one-line TL;DR.\n",
    );
    prompt.push_str(&format!("URL: {}\n", request.url));

    let mut changes = String::new();
    for diff in request.diffs {
        changes.push_str(&format!(
            "----- {} vs {} -----\n",
            diff.base_label, diff.compare_label
        ));
        for op in &diff.ops {
            let (marker, side) = match op.kind {
                DiffKind::Equal => continue,
                DiffKind::Delete => ('-', &diff.base_label),
                DiffKind::Insert => ('+', &diff.compare_label),
            };
            changes.push_str(&format!("{} [{}] {}\n", marker, side, op.words.join(" ")));
        }
    }
    if changes.is_empty() {
        changes.push_str("(no archived versions were available)\n");
    }

    let cut = changes
        .char_indices()
        .nth(MAX_PROMPT_CHARS)
        .map(|(i, _)| i)
        .unwrap_or(changes.len());
    prompt.push_str(&changes[..cut]);
    prompt
}
