//! SQLite-backed item store.
//!
//! All access goes through [`ItemStore::transaction`], which runs a closure on the blocking pool
//! inside one SQLite transaction. Returning `Err` from the closure rolls the whole scope back.
//! `status`/`closed_at` are the only columns ever updated after insert.

mod migrations;

use crate::horizon::Horizon;
use crate::item::{Item, ItemId, ItemKind, ItemStatus, NewItem};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, Row, params, params_from_iter};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

const ITEM_SELECT_SQL: &str = "SELECT
    id,
    source_user_id,
    source_chat_id,
    source_message_id,
    kind,
    horizon_tag,
    text,
    transcript,
    summary,
    title,
    status,
    created_at,
    closed_at,
    raw_payload
FROM items";

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid persisted item data: {0}")]
    InvalidData(String),

    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },

    #[error("store connection lock poisoned")]
    Poisoned,

    #[error("store task failed: {0}")]
    Join(String),
}

/// Outcome of [`ItemTx::close`]. Closing twice is not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    Closed(Item),
    AlreadyClosed(Item),
    NotFound,
}

/// Filter for [`ItemTx::list_open`]. Unset fields do not constrain; an empty `kind_in` or
/// `horizon_in` means any.
#[derive(Debug, Clone, Default)]
pub struct OpenItemsFilter {
    pub user_id: Option<i64>,
    pub kind: Option<ItemKind>,
    pub kind_in: Vec<ItemKind>,
    pub horizon: Option<Horizon>,
    pub horizon_in: Vec<Horizon>,
}

#[derive(Clone)]
pub struct ItemStore {
    conn: Arc<Mutex<Connection>>,
}

impl ItemStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::InvalidData(format!("create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)?;
        let store = Self::bootstrap(conn)?;
        tracing::info!(path = %path.display(), "item store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(mut conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
        migrations::apply_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` inside one transaction. Commits on `Ok`, rolls back on `Err` or panic.
    pub async fn transaction<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&ItemTx<'_>) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            let tx = guard.transaction()?;
            let out = f(&ItemTx { conn: &tx })?;
            tx.commit()?;
            Ok(out)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

/// Item operations bound to an open transaction.
pub struct ItemTx<'a> {
    conn: &'a Connection,
}

impl ItemTx<'_> {
    pub fn create(&self, new: NewItem) -> StoreResult<Item> {
        let item = Item {
            id: Uuid::new_v4(),
            source_user_id: new.source_user_id,
            source_chat_id: new.source_chat_id,
            source_message_id: new.source_message_id,
            kind: new.kind,
            horizon_tag: new.horizon_tag,
            text: new.text,
            transcript: new.transcript,
            summary: new.summary,
            title: new.title,
            status: ItemStatus::Open,
            created_at: Utc::now(),
            closed_at: None,
            raw_payload: new.raw_payload,
        };
        let raw_payload = serde_json::to_string(&item.raw_payload)
            .map_err(|e| StoreError::InvalidData(format!("raw_payload: {e}")))?;

        self.conn.execute(
            "INSERT INTO items (
                id,
                source_user_id,
                source_chat_id,
                source_message_id,
                kind,
                horizon_tag,
                text,
                transcript,
                summary,
                title,
                status,
                created_at,
                closed_at,
                raw_payload
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, NULL, ?13);",
            params![
                item.id.to_string(),
                item.source_user_id,
                item.source_chat_id,
                item.source_message_id,
                item.kind.as_str(),
                item.horizon_tag.map(Horizon::as_str),
                item.text.as_str(),
                item.transcript.as_deref(),
                item.summary.as_deref(),
                item.title.as_deref(),
                item.status.as_str(),
                item.created_at,
                raw_payload,
            ],
        )?;

        Ok(item)
    }

    pub fn get(&self, id: ItemId) -> StoreResult<Option<Item>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{ITEM_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query(params![id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_item_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn close(&self, id: ItemId) -> StoreResult<CloseOutcome> {
        self.close_at(id, Utc::now())
    }

    fn close_at(&self, id: ItemId, now: DateTime<Utc>) -> StoreResult<CloseOutcome> {
        let changed = self.conn.execute(
            "UPDATE items SET status = 'closed', closed_at = ?1
             WHERE id = ?2 AND status = 'open';",
            params![now, id.to_string()],
        )?;

        let Some(item) = self.get(id)? else {
            return Ok(CloseOutcome::NotFound);
        };
        if changed == 1 {
            Ok(CloseOutcome::Closed(item))
        } else {
            Ok(CloseOutcome::AlreadyClosed(item))
        }
    }

    /// Open items matching `filter`, newest first.
    pub fn list_open(&self, filter: &OpenItemsFilter, limit: u32) -> StoreResult<Vec<Item>> {
        let mut sql = format!("{ITEM_SELECT_SQL} WHERE status = 'open'");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(user_id) = filter.user_id {
            sql.push_str(" AND source_user_id = ?");
            bind_values.push(Value::Integer(user_id));
        }
        if let Some(kind) = filter.kind {
            sql.push_str(" AND kind = ?");
            bind_values.push(Value::Text(kind.as_str().to_string()));
        }
        if !filter.kind_in.is_empty() {
            let placeholders = vec!["?"; filter.kind_in.len()].join(", ");
            sql.push_str(&format!(" AND kind IN ({placeholders})"));
            bind_values.extend(
                filter
                    .kind_in
                    .iter()
                    .map(|k| Value::Text(k.as_str().to_string())),
            );
        }
        if let Some(horizon) = filter.horizon {
            sql.push_str(" AND horizon_tag = ?");
            bind_values.push(Value::Text(horizon.as_str().to_string()));
        }
        if !filter.horizon_in.is_empty() {
            let placeholders = vec!["?"; filter.horizon_in.len()].join(", ");
            sql.push_str(&format!(" AND horizon_tag IN ({placeholders})"));
            bind_values.extend(
                filter
                    .horizon_in
                    .iter()
                    .map(|h| Value::Text(h.as_str().to_string())),
            );
        }

        sql.push_str(" ORDER BY created_at DESC, rowid DESC LIMIT ?");
        bind_values.push(Value::Integer(i64::from(limit)));

        self.query_items(&sql, bind_values)
    }

    /// Every item regardless of status, newest first.
    pub fn list_recent(&self, limit: u32) -> StoreResult<Vec<Item>> {
        let sql = format!("{ITEM_SELECT_SQL} ORDER BY created_at DESC, rowid DESC LIMIT ?");
        self.query_items(&sql, vec![Value::Integer(i64::from(limit))])
    }

    pub fn count(&self) -> StoreResult<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM items;", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    fn query_items(&self, sql: &str, bind_values: Vec<Value>) -> StoreResult<Vec<Item>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_item_row(row)?);
        }
        Ok(items)
    }
}

fn parse_item_row(row: &Row<'_>) -> StoreResult<Item> {
    let id_text: String = row.get("id")?;
    let id = Uuid::parse_str(&id_text)
        .map_err(|_| StoreError::InvalidData(format!("invalid id `{id_text}` in items.id")))?;

    let kind_text: String = row.get("kind")?;
    let kind = kind_text.parse::<ItemKind>().map_err(StoreError::InvalidData)?;

    let horizon_tag = match row.get::<_, Option<String>>("horizon_tag")? {
        Some(value) => Some(Horizon::from_tag(&value).ok_or_else(|| {
            StoreError::InvalidData(format!("invalid horizon `{value}` in items.horizon_tag"))
        })?),
        None => None,
    };

    let status_text: String = row.get("status")?;
    let status = status_text
        .parse::<ItemStatus>()
        .map_err(StoreError::InvalidData)?;

    let raw_text: String = row.get("raw_payload")?;
    let raw_payload = serde_json::from_str(&raw_text)
        .map_err(|e| StoreError::InvalidData(format!("items.raw_payload: {e}")))?;

    Ok(Item {
        id,
        source_user_id: row.get("source_user_id")?,
        source_chat_id: row.get("source_chat_id")?,
        source_message_id: row.get("source_message_id")?,
        kind,
        horizon_tag,
        text: row.get("text")?,
        transcript: row.get("transcript")?,
        summary: row.get("summary")?,
        title: row.get("title")?,
        status,
        created_at: row.get("created_at")?,
        closed_at: row.get("closed_at")?,
        raw_payload,
    })
}

#[cfg(test)]
mod tests {
    use super::{CloseOutcome, ItemStore, OpenItemsFilter, StoreError};
    use crate::horizon::Horizon;
    use crate::item::{ItemKind, ItemStatus, NewItem};
    use serde_json::json;
    use uuid::Uuid;

    fn new_item(user: i64, kind: ItemKind, horizon: Option<Horizon>, text: &str) -> NewItem {
        NewItem {
            source_user_id: user,
            source_chat_id: user,
            source_message_id: Some(1),
            kind,
            horizon_tag: horizon,
            text: text.to_string(),
            transcript: None,
            summary: None,
            title: Some(text.to_string()),
            raw_payload: json!({"update_id": 1}),
        }
    }

    #[tokio::test]
    async fn create_then_get_returns_open_item() {
        let store = ItemStore::open_in_memory().expect("store");
        let created = store
            .transaction(|tx| tx.create(new_item(7, ItemKind::Task, Some(Horizon::Week), "купить")))
            .await
            .expect("create");
        assert_eq!(created.status, ItemStatus::Open);
        assert!(created.closed_at.is_none());

        let id = created.id;
        let fetched = store
            .transaction(move |tx| tx.get(id))
            .await
            .expect("get")
            .expect("item exists");
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.horizon_tag, Some(Horizon::Week));
        assert_eq!(fetched.raw_payload, json!({"update_id": 1}));
        assert_eq!(fetched.created_at, created.created_at);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_keeps_first_closed_at() {
        let store = ItemStore::open_in_memory().expect("store");
        let id = store
            .transaction(|tx| tx.create(new_item(7, ItemKind::Task, None, "a")))
            .await
            .expect("create")
            .id;

        let first = store.transaction(move |tx| tx.close(id)).await.expect("close");
        let CloseOutcome::Closed(first) = first else {
            panic!("first close must transition, got {first:?}");
        };
        assert_eq!(first.status, ItemStatus::Closed);
        let closed_at = first.closed_at.expect("closed_at set");

        let second = store.transaction(move |tx| tx.close(id)).await.expect("close");
        let CloseOutcome::AlreadyClosed(second) = second else {
            panic!("second close must be a no-op, got {second:?}");
        };
        assert_eq!(second.status, ItemStatus::Closed);
        assert_eq!(second.closed_at, Some(closed_at));
    }

    #[tokio::test]
    async fn close_unknown_id_reports_not_found() {
        let store = ItemStore::open_in_memory().expect("store");
        let outcome = store
            .transaction(|tx| tx.close(Uuid::new_v4()))
            .await
            .expect("close");
        assert_eq!(outcome, CloseOutcome::NotFound);
    }

    #[tokio::test]
    async fn list_open_filters_and_orders_newest_first() {
        let store = ItemStore::open_in_memory().expect("store");
        let closed_id = store
            .transaction(|tx| {
                tx.create(new_item(1, ItemKind::Task, Some(Horizon::Week), "oldest"))?;
                tx.create(new_item(1, ItemKind::Idea, Some(Horizon::Quarter), "idea"))?;
                tx.create(new_item(2, ItemKind::Task, Some(Horizon::Week), "other user"))?;
                let closed = tx.create(new_item(1, ItemKind::Task, None, "closed"))?;
                tx.create(new_item(1, ItemKind::Task, Some(Horizon::Month), "newest"))?;
                Ok(closed.id)
            })
            .await
            .expect("seed");
        store
            .transaction(move |tx| tx.close(closed_id))
            .await
            .expect("close");

        let tasks = store
            .transaction(|tx| {
                tx.list_open(
                    &OpenItemsFilter {
                        user_id: Some(1),
                        kind: Some(ItemKind::Task),
                        ..OpenItemsFilter::default()
                    },
                    10,
                )
            })
            .await
            .expect("list");
        let texts: Vec<&str> = tasks.iter().map(|i| i.text.as_str()).collect();
        assert_eq!(texts, vec!["newest", "oldest"]);

        let horizons = store
            .transaction(|tx| {
                tx.list_open(
                    &OpenItemsFilter {
                        horizon_in: vec![Horizon::Week, Horizon::Quarter],
                        ..OpenItemsFilter::default()
                    },
                    10,
                )
            })
            .await
            .expect("list");
        assert_eq!(horizons.len(), 3);

        let ideas_and_notes = store
            .transaction(|tx| {
                tx.list_open(
                    &OpenItemsFilter {
                        kind_in: vec![ItemKind::Idea, ItemKind::Note],
                        ..OpenItemsFilter::default()
                    },
                    10,
                )
            })
            .await
            .expect("list");
        let texts: Vec<&str> = ideas_and_notes.iter().map(|i| i.text.as_str()).collect();
        assert_eq!(texts, vec!["idea"]);

        let limited = store
            .transaction(|tx| tx.list_open(&OpenItemsFilter::default(), 1))
            .await
            .expect("list");
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].text, "newest");

        let everything = store
            .transaction(|tx| tx.list_recent(100))
            .await
            .expect("list recent");
        assert_eq!(everything.len(), 5);
    }

    #[tokio::test]
    async fn failed_scope_rolls_back_every_write() {
        let store = ItemStore::open_in_memory().expect("store");
        let result: Result<(), StoreError> = store
            .transaction(|tx| {
                tx.create(new_item(1, ItemKind::Task, None, "partial"))?;
                Err(StoreError::InvalidData("boom".to_string()))
            })
            .await;
        assert!(result.is_err());

        let count = store.transaction(|tx| tx.count()).await.expect("count");
        assert_eq!(count, 0);
    }
}
