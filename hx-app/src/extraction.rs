//! Classify free text into `{kind, horizon_tag, title, summary}`.

use crate::context::Generative;
use crate::horizon::{self, Horizon};
use crate::item::{ItemKind, truncate_chars};
use anyhow::Result;
use hx_llm::ChatOptions;
use serde_json::Value;

pub const TITLE_MAX_CHARS: usize = 120;

const EXTRACTION_TEMPERATURE: f32 = 0.2;

const EXTRACTION_SYSTEM_PROMPT: &str = "\
Ты извлекаешь метаданные из заметки пользователя и коротко её пересказываешь, не меняя смысла.
Правила:
- Ничего не выдумывай и не добавляй от себя.
- Сохраняй формулировки пользователя, перефразируй по минимуму.
- kind: строго одно из task | idea | note.
- horizon_tag: строго одно из #неделя | #месяц | #квартал | #год, либо null.
- title: 3–10 слов по сути.
- summary: 1–3 короткие строки без воды.
Ответь ТОЛЬКО JSON-объектом ровно с ключами kind, horizon_tag, title, summary.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub kind: ItemKind,
    pub horizon_tag: Option<Horizon>,
    pub title: Option<String>,
    pub summary: Option<String>,
}

/// Classify `text`. Only a failed backend call is an error; bad output degrades per field.
#[tracing::instrument(level = "debug", skip_all, fields(chars = text.chars().count()))]
pub async fn extract(generative: &Generative, text: &str) -> Result<Extraction> {
    let backend = match generative {
        Generative::NotConfigured => return Ok(heuristic(text)),
        Generative::Configured(backend) => backend,
    };

    let options = ChatOptions {
        temperature: Some(EXTRACTION_TEMPERATURE),
        json_object: true,
    };
    let raw = backend
        .complete(EXTRACTION_SYSTEM_PROMPT, text, options)
        .await?;
    let extraction = validate_extraction(&raw, text);
    tracing::debug!(
        kind = %extraction.kind,
        horizon = ?extraction.horizon_tag,
        has_title = extraction.title.is_some(),
        has_summary = extraction.summary.is_some(),
        "extraction validated"
    );
    Ok(extraction)
}

/// Result used when no generative backend is configured.
pub fn heuristic(text: &str) -> Extraction {
    let trimmed = text.trim();
    Extraction {
        kind: ItemKind::Task,
        horizon_tag: horizon::resolve(text),
        title: (!trimmed.is_empty()).then(|| truncate_chars(trimmed, TITLE_MAX_CHARS).to_string()),
        summary: None,
    }
}

/// Parse a raw backend reply. Anything that is not a JSON object yields all defaults.
pub fn validate_extraction(raw: &str, original_text: &str) -> Extraction {
    let value = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(%e, "extraction reply is not json; using defaults");
            Value::Null
        }
    };
    validate_extraction_value(&value, original_text)
}

/// Validate each field independently against its allowed values.
pub fn validate_extraction_value(value: &Value, original_text: &str) -> Extraction {
    let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::trim);

    let kind = field("kind")
        .and_then(|k| k.parse::<ItemKind>().ok())
        .unwrap_or_default();
    let horizon_tag = field("horizon_tag")
        .and_then(Horizon::from_tag)
        .or_else(|| horizon::resolve(original_text));
    let non_blank = |name: &str| {
        field(name)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    Extraction {
        kind,
        horizon_tag,
        title: non_blank("title"),
        summary: non_blank("summary"),
    }
}
