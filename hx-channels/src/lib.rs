//! Chat-platform adapter for the capture bot.
//!
//! The adapter is pure I/O: it decodes Telegram webhook updates and performs the handful of
//! Bot API calls the pipeline needs (send, answer callback, resolve and download files).

mod telegram;
mod traits;
mod types;

pub use telegram::{DEFAULT_API_BASE_URL, TelegramBotApi};
pub use traits::Messenger;
pub use types::{
    CallbackId, CallbackQuery, Chat, ChatId, FileId, InlineButton, Message, MessageId,
    OutboundMessage, Update, User, UserId, Voice,
};
