use async_trait::async_trait;

use super::error::ProviderError;
use super::types::ConversationHistory;

/// Text completion and image generation backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Answer the last user turn of `history`.
    async fn complete(
        &self,
        history: &ConversationHistory,
        temperature: f32,
    ) -> Result<String, ProviderError>;

    /// Raw image bytes for `prompt`.
    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, ProviderError>;
}
