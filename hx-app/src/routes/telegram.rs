use crate::http_auth::{self, SecretCheck, TELEGRAM_SECRET_HEADER};
use crate::server::AppState;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Json};
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/telegram/webhook", post(telegram_webhook))
}

/// Telegram retries anything but a 2xx, so every outcome past the secret check answers 200.
#[tracing::instrument(level = "info", skip_all, fields(bytes = body.len()))]
async fn telegram_webhook(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let check = http_auth::check_shared_secret(
        state.webhook_secret.as_deref(),
        &headers,
        TELEGRAM_SECRET_HEADER,
    );
    if check == SecretCheck::Rejected {
        return http_auth::error_response(StatusCode::UNAUTHORIZED, "bad webhook secret");
    }

    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(raw) => state.dispatcher.handle_raw(raw).await,
        Err(e) => tracing::warn!(%e, "webhook body is not json"),
    }

    (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response()
}
