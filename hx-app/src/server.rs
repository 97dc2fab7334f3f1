//! H-2000 server and one-shot CLI actions.

use crate::config::AppConfig;
use crate::context::{self, AppContext};
use crate::dispatcher::Dispatcher;
use crate::routes;
use crate::scheduler;
use crate::sheets::{self, SyncOutcome};
use anyhow::{Context, Result};
use axum::Extension;
use axum::http::HeaderMap;
use axum::http::Request;
use axum::http::StatusCode;
use axum::response::Response;
use hx_channels::TelegramBotApi;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub webhook_secret: Option<String>,
    pub shortcuts_token: Option<String>,
    pub timezone: String,
    pub sheets_sync: bool,
}

impl AppState {
    pub fn new(cfg: &AppConfig, ctx: AppContext) -> Self {
        Self {
            dispatcher: Dispatcher::new(ctx),
            webhook_secret: cfg.webhook_secret().map(str::to_string),
            shortcuts_token: cfg.shortcuts_token().map(str::to_string),
            timezone: cfg.general.timezone.clone(),
            sheets_sync: cfg.sheets.enabled && cfg.sheets.is_configured(),
        }
    }
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = AppConfig::load(config_path).await?;
    let bind_addr = cfg.bind_addr()?;
    if let Err(e) = cfg.validate_for_serve() {
        tracing::warn!(error = %e, "serve would refuse to start");
    }
    let generative = context::build_generative(&cfg)?;
    let persistence = context::build_persistence(&cfg)?;
    let item_count = match persistence.store() {
        Some(store) => Some(store.transaction(|tx| tx.count()).await?),
        None => None,
    };
    tracing::info!(
        %bind_addr,
        telegram_token = !cfg.telegram.bot_token.trim().is_empty(),
        webhook_secret = cfg.webhook_secret().is_some(),
        generative = generative.is_configured(),
        chat_model = %cfg.groq.chat_model,
        transcription_model = %cfg.groq.transcription_model,
        persistence = persistence.is_configured(),
        item_count = ?item_count,
        shortcuts = cfg.shortcuts_token().is_some(),
        sheets_enabled = cfg.sheets.enabled,
        sheets_configured = cfg.sheets.is_configured(),
        sheets_sync_time = ?cfg.sheets.sync_hour_minute(),
        "config ok"
    );
    Ok(())
}

pub async fn sync_sheets(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = AppConfig::load(config_path).await?;
    let persistence = context::build_persistence(&cfg)?;
    match sheets::sync_from_store(&cfg.sheets, &persistence).await? {
        SyncOutcome::Synced(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        SyncOutcome::Skipped(reason) => {
            tracing::warn!(reason, "sheets sync skipped");
        }
    }
    Ok(())
}

pub async fn set_webhook(config_path: Option<PathBuf>, url: &str) -> Result<()> {
    let cfg = AppConfig::load(config_path).await?;
    cfg.validate_for_serve()?;
    let api = TelegramBotApi::with_base_url(&cfg.telegram.bot_token, &cfg.telegram.api_base_url)?;
    api.set_webhook(url, cfg.webhook_secret())
        .await
        .context("register telegram webhook")?;
    tracing::info!(url, secret = cfg.webhook_secret().is_some(), "telegram webhook registered");
    Ok(())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = AppConfig::load(config_path).await?;
    cfg.validate_for_serve()?;
    let addr = cfg.bind_addr()?;
    let listener = preflight_bind_listener(addr).await?;

    let ctx = AppContext::from_config(&cfg)?;
    tracing::info!(
        generative = ctx.generative.is_configured(),
        persistence = ctx.persistence.is_configured(),
        update_timeout_seconds = cfg.server.update_timeout_seconds,
        "app context built"
    );

    let shutdown = CancellationToken::new();
    let scheduler_handle =
        scheduler::spawn(&cfg, ctx.persistence.clone(), shutdown.child_token())?;

    let state = Arc::new(AppState::new(&cfg, ctx));
    let app_router = routes::router().layer(Extension(state));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri().path(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri().path(),
                request_id = %request_id_from_headers(request.headers()),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = app_router
        .layer(GlobalConcurrencyLimitLayer::new(cfg.server.max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            cfg.server.http_timeout(),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!(%addr, "hx2000 serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");

    shutdown.cancel();
    if let Some(handle) = scheduler_handle {
        match handle.await {
            Ok(()) => tracing::info!("sheets scheduler shutdown completed"),
            Err(e) => tracing::error!(error = %e, "sheets scheduler join failed during shutdown"),
        }
    }

    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tracing::info!(%addr, "preflight bind check starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
            _ = shutdown.cancelled() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => tracing::warn!("received ctrl-c; beginning graceful shutdown"),
                Err(e) => tracing::error!(error = %e, "failed to await ctrl-c signal"),
            },
            _ = shutdown.cancelled() => {}
        }
    }
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::{AppState, request_id_from_headers};
    use crate::config::AppConfig;
    use crate::context::Generative;
    use crate::test_support::{RecordingMessenger, context};
    use axum::http::HeaderMap;
    use std::sync::Arc;

    #[test]
    fn request_id_defaults_to_missing() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_id_from_headers(&headers), "missing");
        headers.insert("x-request-id", "abc-123".parse().expect("header"));
        assert_eq!(request_id_from_headers(&headers), "abc-123");
    }

    #[test]
    fn state_copies_only_non_blank_secrets() {
        let mut cfg = AppConfig::default();
        cfg.telegram.webhook_secret = Some("  ".to_string());
        cfg.shortcuts.token = Some("tok".to_string());
        let state = AppState::new(
            &cfg,
            context(
                Arc::new(RecordingMessenger::default()),
                Generative::NotConfigured,
                None,
            ),
        );
        assert_eq!(state.webhook_secret, None);
        assert_eq!(state.shortcuts_token.as_deref(), Some("tok"));
        assert!(!state.sheets_sync);
    }
}
