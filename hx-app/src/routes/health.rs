use crate::server::AppState;
use axum::routing::get;
use axum::{Extension, Json};
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/health", get(get_health))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let ctx = state.dispatcher.context();
    Json(serde_json::json!({
        "ok": true,
        "generative": ctx.generative.is_configured(),
        "persistence": ctx.persistence.is_configured(),
        "sheets_sync": state.sheets_sync,
    }))
}
