use crate::error::{LlmError, Result};
use crate::openai::OpenAiCompatClient;
use crate::types::{ChatMessage, ChatOptions, ChatResponse};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub chat_model: String,
    pub transcription_model: String,
    pub request_timeout: Duration,
}

impl LlmClientConfig {
    pub fn new(api_key: &str) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.to_string(),
            chat_model: "llama-3.1-8b-instant".to_string(),
            transcription_model: "whisper-large-v3".to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct LlmClient {
    inner: OpenAiCompatClient,
    chat_model: String,
    transcription_model: String,
}

impl LlmClient {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(config: LlmClientConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(LlmError::InvalidInput("api key is required".to_string()));
        }
        if config.chat_model.trim().is_empty() {
            return Err(LlmError::InvalidInput("chat model is required".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        Ok(Self {
            inner: OpenAiCompatClient::new(http, &config.base_url, config.api_key.trim()),
            chat_model: config.chat_model,
            transcription_model: config.transcription_model,
        })
    }

    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    pub fn transcription_model(&self) -> &str {
        &self.transcription_model
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn chat(&self, messages: &[ChatMessage], options: ChatOptions) -> Result<ChatResponse> {
        if messages.is_empty() {
            return Err(LlmError::InvalidInput("messages must not be empty".to_string()));
        }
        self.inner.chat(&self.chat_model, messages, options).await
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn transcribe(&self, audio: Vec<u8>, filename: &str) -> Result<String> {
        if audio.is_empty() {
            return Err(LlmError::InvalidInput("audio payload is empty".to_string()));
        }
        self.inner
            .transcribe(&self.transcription_model, audio, filename)
            .await
    }
}
