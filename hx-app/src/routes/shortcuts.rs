//! Reminder feeds polled by iOS Shortcuts.

use crate::horizon::Horizon;
use crate::http_auth::{self, SHORTCUTS_TOKEN_HEADER, SecretCheck};
use crate::item::{Item, ItemKind};
use crate::server::AppState;
use crate::store::OpenItemsFilter;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;

const FEED_LIMIT: u32 = 200;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/shortcuts/reminders/daily", get(daily))
        .route("/shortcuts/reminders/weekly", get(weekly))
}

#[derive(Debug, Clone, Copy)]
enum Feed {
    /// Open tasks for this week.
    Daily,
    /// Open tasks and ideas for the quarter.
    Weekly,
}

impl Feed {
    fn name(self) -> &'static str {
        match self {
            Feed::Daily => "daily",
            Feed::Weekly => "weekly",
        }
    }

    fn horizon(self) -> Horizon {
        match self {
            Feed::Daily => Horizon::Week,
            Feed::Weekly => Horizon::Quarter,
        }
    }

    fn kinds(self) -> Vec<ItemKind> {
        match self {
            Feed::Daily => vec![ItemKind::Task],
            Feed::Weekly => vec![ItemKind::Task, ItemKind::Idea],
        }
    }
}

#[derive(Debug, Serialize)]
struct FeedItem {
    id: String,
    kind: ItemKind,
    title: String,
    text: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Item> for FeedItem {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id.to_string(),
            kind: item.kind,
            title: item.display_title(80),
            text: item.text.clone(),
            created_at: item.created_at,
        }
    }
}

async fn daily(Extension(state): Extension<Arc<AppState>>, headers: HeaderMap) -> Response {
    serve_feed(&state, &headers, Feed::Daily).await
}

async fn weekly(Extension(state): Extension<Arc<AppState>>, headers: HeaderMap) -> Response {
    serve_feed(&state, &headers, Feed::Weekly).await
}

#[tracing::instrument(level = "info", skip_all, fields(feed = feed.name()))]
async fn serve_feed(state: &AppState, headers: &HeaderMap, feed: Feed) -> Response {
    match http_auth::check_shared_secret(
        state.shortcuts_token.as_deref(),
        headers,
        SHORTCUTS_TOKEN_HEADER,
    ) {
        SecretCheck::Accepted => {}
        SecretCheck::NotConfigured => {
            return http_auth::error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "SHORTCUTS_TOKEN not configured",
            );
        }
        SecretCheck::Rejected => {
            return http_auth::error_response(StatusCode::UNAUTHORIZED, "bad shortcuts token");
        }
    }

    let items = match state.dispatcher.context().persistence.store() {
        None => Vec::new(),
        Some(store) => {
            let filter = OpenItemsFilter {
                kind_in: feed.kinds(),
                horizon: Some(feed.horizon()),
                ..OpenItemsFilter::default()
            };
            match store
                .transaction(move |tx| tx.list_open(&filter, FEED_LIMIT))
                .await
            {
                Ok(items) => items,
                Err(e) => {
                    tracing::error!(%e, "reminder feed query failed");
                    return http_auth::error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "item store unavailable",
                    );
                }
            }
        }
    };
    let items: Vec<FeedItem> = items.iter().map(FeedItem::from).collect();
    tracing::debug!(count = items.len(), "reminder feed built");

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "kind": feed.name(),
            "timezone": state.timezone,
            "horizon": feed.horizon().marker(),
            "items": items,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::FEED_LIMIT;
    use crate::context::Generative;
    use crate::horizon::Horizon;
    use crate::http_auth::SHORTCUTS_TOKEN_HEADER;
    use crate::item::{ItemKind, NewItem};
    use crate::routes::test_helpers::{app, body_json, state};
    use crate::server::AppState;
    use crate::store::ItemStore;
    use crate::test_support::{RecordingMessenger, context};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::util::ServiceExt;

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(SHORTCUTS_TOKEN_HEADER, token);
        }
        builder.body(Body::empty()).expect("request")
    }

    async fn seeded_store() -> ItemStore {
        let store = ItemStore::open_in_memory().expect("store");
        store
            .transaction(|tx| {
                let seeds = [
                    (ItemKind::Task, Some(Horizon::Week), "неделя задача"),
                    (ItemKind::Idea, Some(Horizon::Week), "неделя идея"),
                    (ItemKind::Task, Some(Horizon::Quarter), "квартал задача"),
                    (ItemKind::Idea, Some(Horizon::Quarter), "квартал идея"),
                    (ItemKind::Note, Some(Horizon::Quarter), "квартал заметка"),
                    (ItemKind::Task, None, "без горизонта"),
                ];
                for (kind, horizon, text) in seeds {
                    tx.create(NewItem {
                        source_user_id: 1,
                        source_chat_id: 1,
                        source_message_id: None,
                        kind,
                        horizon_tag: horizon,
                        text: text.to_string(),
                        transcript: None,
                        summary: None,
                        title: None,
                        raw_payload: serde_json::Value::Null,
                    })?;
                }
                Ok(())
            })
            .await
            .expect("seed");
        store
    }

    fn quarter_item(kind: ItemKind, text: &str) -> NewItem {
        NewItem {
            source_user_id: 1,
            source_chat_id: 1,
            source_message_id: None,
            kind,
            horizon_tag: Some(Horizon::Quarter),
            text: text.to_string(),
            transcript: None,
            summary: None,
            title: None,
            raw_payload: serde_json::Value::Null,
        }
    }

    fn app_with(store: Option<ItemStore>) -> axum::Router {
        app(state(context(
            Arc::new(RecordingMessenger::default()),
            Generative::NotConfigured,
            store,
        )))
    }

    #[tokio::test]
    async fn daily_feed_lists_week_tasks_only() {
        let response = app_with(Some(seeded_store().await))
            .oneshot(get("/shortcuts/reminders/daily", Some("shortcut-token")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["kind"], "daily");
        assert_eq!(body["timezone"], "Europe/Moscow");
        assert_eq!(body["horizon"], "#неделя");
        let items = body["items"].as_array().expect("items");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["text"], "неделя задача");
        assert_eq!(items[0]["kind"], "task");
    }

    #[tokio::test]
    async fn weekly_feed_lists_quarter_tasks_and_ideas() {
        let response = app_with(Some(seeded_store().await))
            .oneshot(get("/shortcuts/reminders/weekly", Some("shortcut-token")))
            .await
            .expect("response");
        let body = body_json(response).await;
        assert_eq!(body["horizon"], "#квартал");
        let texts: Vec<&str> = body["items"]
            .as_array()
            .expect("items")
            .iter()
            .filter_map(|item| item["text"].as_str())
            .collect();
        assert_eq!(texts, vec!["квартал идея", "квартал задача"]);
    }

    #[tokio::test]
    async fn newer_notes_do_not_crowd_tasks_out_of_the_feed() {
        let store = ItemStore::open_in_memory().expect("store");
        store
            .transaction(|tx| {
                tx.create(quarter_item(ItemKind::Task, "старая задача"))?;
                for n in 0..=FEED_LIMIT {
                    tx.create(quarter_item(ItemKind::Note, &format!("заметка {n}")))?;
                }
                Ok(())
            })
            .await
            .expect("seed");

        let response = app_with(Some(store))
            .oneshot(get("/shortcuts/reminders/weekly", Some("shortcut-token")))
            .await
            .expect("response");
        let body = body_json(response).await;
        let items = body["items"].as_array().expect("items");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["text"], "старая задача");
    }

    #[tokio::test]
    async fn feed_without_persistence_is_empty() {
        let response = app_with(None)
            .oneshot(get("/shortcuts/reminders/daily", Some("shortcut-token")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["items"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn token_checks() {
        let response = app_with(None)
            .oneshot(get("/shortcuts/reminders/daily", Some("nope")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app_with(None)
            .oneshot(get("/shortcuts/reminders/weekly", None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let unconfigured = Arc::new(AppState {
            shortcuts_token: None,
            ..Arc::unwrap_or_clone(state(context(
                Arc::new(RecordingMessenger::default()),
                Generative::NotConfigured,
                None,
            )))
        });
        let response = app(unconfigured)
            .oneshot(get("/shortcuts/reminders/daily", Some("anything")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
