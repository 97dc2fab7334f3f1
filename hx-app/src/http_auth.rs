use axum::Json;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use sha2::{Digest, Sha256};

pub const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";
pub const SHORTCUTS_TOKEN_HEADER: &str = "x-shortcuts-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretCheck {
    Accepted,
    /// No secret configured on our side.
    NotConfigured,
    Rejected,
}

/// Compare the configured secret against `header_name`. A blank expected value counts as unset.
pub fn check_shared_secret(
    expected: Option<&str>,
    headers: &HeaderMap,
    header_name: &str,
) -> SecretCheck {
    let Some(expected) = expected.map(str::trim).filter(|v| !v.is_empty()) else {
        return SecretCheck::NotConfigured;
    };
    let provided = headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if secrets_match(expected, provided) {
        SecretCheck::Accepted
    } else {
        tracing::warn!(header = header_name, "shared secret rejected");
        SecretCheck::Rejected
    }
}

/// Digest both sides first so the comparison time does not depend on the secret's length.
fn secrets_match(expected: &str, provided: &str) -> bool {
    let expected = Sha256::digest(expected.as_bytes());
    let provided = Sha256::digest(provided.as_bytes());
    constant_time_eq(&expected, &provided)
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    let mut diff = left.len() ^ right.len();
    let max_len = left.len().max(right.len());
    for index in 0..max_len {
        let l = left.get(index).copied().unwrap_or(0);
        let r = right.get(index).copied().unwrap_or(0);
        diff |= (l ^ r) as usize;
    }
    diff == 0
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "ok": false,
            "error": message.into(),
        })),
    )
        .into_response()
}
