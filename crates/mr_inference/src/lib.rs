pub mod divergence;
pub mod models;
pub mod summarizer;

pub use divergence::DiffEngine;
pub use summarizer::{Summarizer, SummaryRequest, SummaryState};

pub mod prelude {
    pub use super::divergence::DiffEngine;
    pub use super::models::{CompletionModel, OpenAiCompatModel, RuleModel};
    pub use super::summarizer::{Summarizer, SummaryRequest};
    pub use mr_core::{DiffResult, Error, ProviderPreference, Result, SummaryResult};
}
