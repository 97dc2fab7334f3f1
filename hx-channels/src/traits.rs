use crate::types::{CallbackId, ChatId, FileId, OutboundMessage};
use anyhow::Result;
use async_trait::async_trait;

/// Outbound half of the chat platform, as seen by the capture pipeline.
///
/// Every call is a single bounded network request with no retry; errors surface to the caller.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a message to a conversation, optionally with inline buttons and a reply reference.
    async fn send(&self, chat_id: ChatId, message: OutboundMessage) -> Result<()>;

    /// Acknowledge an inline-button press, optionally showing a short toast text.
    async fn answer_callback(&self, callback_id: &CallbackId, text: Option<&str>) -> Result<()>;

    /// Resolve a file reference to a downloadable platform path.
    async fn resolve_file(&self, file_id: &FileId) -> Result<String>;

    /// Download the bytes behind a path returned by [`Messenger::resolve_file`].
    async fn download(&self, file_path: &str) -> Result<Vec<u8>>;
}
