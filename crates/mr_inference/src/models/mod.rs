pub mod openai;
pub mod rule;

pub use openai::OpenAiCompatModel;
pub use rule::RuleModel;

pub use mr_core::CompletionModel;
