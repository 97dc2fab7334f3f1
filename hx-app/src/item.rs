//! The captured `Item` record and its enumerations.

use crate::horizon::Horizon;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type ItemId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    #[default]
    Task,
    Idea,
    Note,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Task => "task",
            ItemKind::Idea => "idea",
            ItemKind::Note => "note",
        }
    }

    /// Russian label used in chat replies.
    pub fn label(self) -> &'static str {
        match self {
            ItemKind::Task => "задача",
            ItemKind::Idea => "идея",
            ItemKind::Note => "заметка",
        }
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(ItemKind::Task),
            "idea" => Ok(ItemKind::Idea),
            "note" => Ok(ItemKind::Note),
            other => Err(format!("unknown item kind: {other:?}")),
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Open,
    Closed,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Open => "open",
            ItemStatus::Closed => "closed",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ItemStatus::Open),
            "closed" => Ok(ItemStatus::Closed),
            other => Err(format!("unknown item status: {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub id: ItemId,
    pub source_user_id: i64,
    pub source_chat_id: i64,
    pub source_message_id: Option<i64>,
    pub kind: ItemKind,
    pub horizon_tag: Option<Horizon>,
    pub text: String,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub title: Option<String>,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub raw_payload: serde_json::Value,
}

impl Item {
    /// Title when present, else the first `max_chars` characters of the text.
    pub fn display_title(&self, max_chars: usize) -> String {
        match self.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(title) => title.to_string(),
            None => truncate_chars(self.text.trim(), max_chars).to_string(),
        }
    }
}

/// Fields supplied at creation; the store assigns id, status and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub source_user_id: i64,
    pub source_chat_id: i64,
    pub source_message_id: Option<i64>,
    pub kind: ItemKind,
    pub horizon_tag: Option<Horizon>,
    pub text: String,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub title: Option<String>,
    pub raw_payload: serde_json::Value,
}

/// Character-boundary-safe prefix.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
