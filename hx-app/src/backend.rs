//! Generative capability used by the pipeline: speech-to-text plus single-turn completions.

use anyhow::Result;
use async_trait::async_trait;
use hx_llm::{ChatMessage, ChatOptions, LlmClient};

#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn transcribe(&self, audio: Vec<u8>, filename: &str) -> Result<String>;

    /// One system + one user turn; returns the assistant text as-is.
    async fn complete(&self, system: &str, user: &str, options: ChatOptions) -> Result<String>;
}

#[async_trait]
impl GenerativeBackend for LlmClient {
    async fn transcribe(&self, audio: Vec<u8>, filename: &str) -> Result<String> {
        Ok(LlmClient::transcribe(self, audio, filename).await?)
    }

    async fn complete(&self, system: &str, user: &str, options: ChatOptions) -> Result<String> {
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        let response = self.chat(&messages, options).await?;
        tracing::debug!(
            model = %self.chat_model(),
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            finish_reason = %response.finish_reason,
            "completion received"
        );
        Ok(response.message.content)
    }
}
