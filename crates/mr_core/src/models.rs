use async_trait::async_trait;
use crate::Result;

/// A chat-completion style text generator.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    fn name(&self) -> &str;

    /// Generate text for a system instruction and a user prompt
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}
