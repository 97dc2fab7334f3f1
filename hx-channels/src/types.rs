use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Telegram's numeric identifiers are 64-bit and may be negative (group chats).
macro_rules! numeric_id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub fn new(value: i64) -> Self {
                Self(value)
            }

            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self::new(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(FileId);
id_newtype!(CallbackId);
numeric_id_newtype!(ChatId);
numeric_id_newtype!(UserId);
numeric_id_newtype!(MessageId);

/// One inline-keyboard button whose press comes back as a callback query carrying `callback_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    /// Rows of inline buttons; empty means no keyboard.
    pub buttons: Vec<Vec<InlineButton>>,
    pub reply_to: Option<MessageId>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn replying_to(mut self, message_id: Option<MessageId>) -> Self {
        self.reply_to = message_id;
        self
    }

    pub fn with_buttons(mut self, buttons: Vec<Vec<InlineButton>>) -> Self {
        self.buttons = buttons;
        self
    }
}

/// Inbound webhook update. Only the fields the pipeline reads are modelled; everything else is
/// ignored on decode and kept by callers in the raw JSON snapshot.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Update {
    #[serde(default)]
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Message {
    #[serde(default)]
    pub message_id: Option<MessageId>,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub chat: Option<Chat>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub voice: Option<Voice>,
    #[serde(default)]
    pub audio: Option<Voice>,
}

impl Message {
    /// Trimmed text, falling back to the caption. `None` when both are blank.
    pub fn text_content(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .or_else(|| {
                self.caption
                    .as_deref()
                    .map(str::trim)
                    .filter(|caption| !caption.is_empty())
            })
    }

    /// Voice note, or an uploaded audio file when no voice note is attached.
    pub fn voice_file(&self) -> Option<&Voice> {
        self.voice.as_ref().or(self.audio.as_ref())
    }

    pub fn sender_id(&self) -> Option<UserId> {
        self.from.as_ref().map(|user| user.id)
    }

    pub fn chat_id(&self) -> Option<ChatId> {
        self.chat.as_ref().map(|chat| chat.id)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Chat {
    pub id: ChatId,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Voice {
    pub file_id: FileId,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallbackQuery {
    pub id: CallbackId,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<Message>,
}
