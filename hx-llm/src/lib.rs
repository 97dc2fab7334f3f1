//! BYO-key client for OpenAI-compatible chat and transcription endpoints.
//!
//! Pure HTTP client with no knowledge of the capture pipeline. Groq is the default target.

mod client;
mod error;
mod openai;
mod types;

pub use client::{DEFAULT_BASE_URL, LlmClient, LlmClientConfig};
pub use error::{LlmError, Result};
pub use types::{ChatMessage, ChatOptions, ChatResponse, Role, Usage};
