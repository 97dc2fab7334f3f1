//! Google Sheets mirror: a full snapshot of items, one tab per horizon/kind.
//!
//! Each run ensures the fixed tabs exist, then clears and rewrites every tab that has rows.
//! Closed items stay in the snapshot with their status.

use crate::config::{SheetsConfig, non_blank};
use crate::context::Persistence;
use crate::horizon::Horizon;
use crate::item::{Item, ItemKind};
use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const REQUIRED_TABS: [&str; 6] = ["Неделя", "Месяц", "Квартал", "Год", "Идея", "Мысли"];
pub const SYNC_ITEM_LIMIT: u32 = 5000;

const HEADER_ROW: [&str; 3] = ["status", "title", "text"];
const TITLE_FALLBACK_CHARS: usize = 80;
const SHEETS_API_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const JWT_LIFETIME_SECONDS: i64 = 3600;
const SHEETS_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    /// Base64 form wins over the raw JSON form; `None` when neither is set.
    pub fn from_config(cfg: &SheetsConfig) -> Result<Option<Self>> {
        let json = if let Some(b64) = non_blank(cfg.service_account_json_b64.as_deref()) {
            let bytes = BASE64
                .decode(b64)
                .context("decode GOOGLE_SHEETS_SA_JSON_B64")?;
            String::from_utf8(bytes).context("service account json is not utf-8")?
        } else if let Some(raw) = non_blank(cfg.service_account_json.as_deref()) {
            raw.to_string()
        } else {
            return Ok(None);
        };
        let key: ServiceAccountKey =
            serde_json::from_str(&json).context("parse service account json")?;
        Ok(Some(key))
    }
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub tabs_updated: usize,
    pub tabs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Skipped(&'static str),
    Synced(SyncReport),
}

pub fn tab_for_item(item: &Item) -> &'static str {
    match item.kind {
        ItemKind::Idea => "Идея",
        ItemKind::Note => "Мысли",
        ItemKind::Task => match item.horizon_tag {
            Some(Horizon::Week) | None => "Неделя",
            Some(Horizon::Month) => "Месяц",
            Some(Horizon::Quarter) => "Квартал",
            Some(Horizon::Year) => "Год",
        },
    }
}

/// `status | title | text` rows grouped by tab, keeping input order within a tab.
pub fn rows_for_items(items: &[Item]) -> BTreeMap<&'static str, Vec<[String; 3]>> {
    let mut grouped: BTreeMap<&'static str, Vec<[String; 3]>> = BTreeMap::new();
    for item in items {
        grouped.entry(tab_for_item(item)).or_default().push([
            item.status.as_str().to_string(),
            item.display_title(TITLE_FALLBACK_CHARS),
            item.text.trim().to_string(),
        ]);
    }
    grouped
}

/// A1 range on a named tab; the name is always quoted with embedded quotes doubled.
pub fn a1(tab: &str, range: &str) -> String {
    format!("'{}'!{range}", tab.replace('\'', "''"))
}

pub struct SheetsClient {
    http: reqwest::Client,
    api_base_url: String,
    spreadsheet_id: String,
    key: ServiceAccountKey,
}

impl SheetsClient {
    pub fn new(spreadsheet_id: &str, key: ServiceAccountKey) -> Result<Self> {
        let spreadsheet_id = spreadsheet_id.trim();
        if spreadsheet_id.is_empty() {
            return Err(anyhow!("spreadsheet id is required"));
        }
        let http = reqwest::Client::builder()
            .timeout(SHEETS_HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_base_url: SHEETS_API_BASE_URL.to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            key,
        })
    }

    fn spreadsheet_url(&self, tail: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.api_base_url)?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("sheets api base url cannot be a base"))?;
            segments.push(&self.spreadsheet_id);
            segments.extend(tail);
        }
        Ok(url)
    }

    fn signed_assertion(&self, now: i64) -> Result<String> {
        let claims = JwtClaims {
            iss: &self.key.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + JWT_LIFETIME_SECONDS,
        };
        let key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .context("service account private key is not an RSA PEM")?;
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .context("sign service account assertion")
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn access_token(&self) -> Result<String> {
        let assertion = self.signed_assertion(chrono::Utc::now().timestamp())?;
        let resp = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("google token exchange failed: status={status} body={body}"));
        }
        let token: TokenResponse = resp.json().await.context("parse google token response")?;
        Ok(token.access_token)
    }

    async fn send_json(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<serde_json::Value> {
        let resp = request.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(anyhow!("sheets {what} failed: status={status} body={text}"));
        }
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn ensure_tabs(&self, token: &str) -> Result<()> {
        let mut url = self.spreadsheet_url(&[])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets(properties(title))");
        let meta = self
            .send_json(self.http.get(url).bearer_auth(token), "get")
            .await?;
        let existing: Vec<&str> = meta["sheets"]
            .as_array()
            .map(|sheets| {
                sheets
                    .iter()
                    .filter_map(|sheet| sheet["properties"]["title"].as_str())
                    .collect()
            })
            .unwrap_or_default();
        let requests: Vec<serde_json::Value> = REQUIRED_TABS
            .iter()
            .filter(|tab| !existing.contains(tab))
            .map(|tab| serde_json::json!({ "addSheet": { "properties": { "title": tab } } }))
            .collect();
        if requests.is_empty() {
            return Ok(());
        }

        tracing::info!(missing = requests.len(), "creating missing sheet tabs");
        let url = Url::parse(&format!(
            "{}:batchUpdate",
            self.spreadsheet_url(&[])?.as_str()
        ))?;
        self.send_json(
            self.http
                .post(url)
                .bearer_auth(token)
                .json(&serde_json::json!({ "requests": requests })),
            "batchUpdate",
        )
        .await?;
        Ok(())
    }

    async fn rewrite_tab(&self, token: &str, tab: &str, rows: &[[String; 3]]) -> Result<()> {
        let clear_url = self.spreadsheet_url(&["values", &format!("{}:clear", a1(tab, "A:Z"))])?;
        self.send_json(
            self.http
                .post(clear_url)
                .bearer_auth(token)
                .json(&serde_json::json!({})),
            "values.clear",
        )
        .await?;

        let mut values: Vec<Vec<&str>> = Vec::with_capacity(rows.len() + 1);
        values.push(HEADER_ROW.to_vec());
        values.extend(rows.iter().map(|row| row.iter().map(String::as_str).collect()));

        let mut update_url = self.spreadsheet_url(&["values", &a1(tab, "A1")])?;
        update_url
            .query_pairs_mut()
            .append_pair("valueInputOption", "RAW");
        self.send_json(
            self.http
                .put(update_url)
                .bearer_auth(token)
                .json(&serde_json::json!({ "values": values })),
            "values.update",
        )
        .await?;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip_all, fields(items = items.len()))]
    pub async fn sync_items(&self, items: &[Item]) -> Result<SyncReport> {
        let token = self.access_token().await?;
        let grouped = rows_for_items(items);
        self.ensure_tabs(&token).await?;

        let mut tabs = Vec::with_capacity(grouped.len());
        for (tab, rows) in &grouped {
            self.rewrite_tab(&token, tab, rows)
                .await
                .with_context(|| format!("rewrite tab {tab}"))?;
            tracing::debug!(tab, rows = rows.len(), "sheet tab rewritten");
            tabs.push((*tab).to_string());
        }
        tabs.sort();
        Ok(SyncReport {
            tabs_updated: tabs.len(),
            tabs,
        })
    }
}

/// One mirror run. Missing sheet config or persistence is a skip, not an error.
#[tracing::instrument(level = "info", skip_all)]
pub async fn sync_from_store(cfg: &SheetsConfig, persistence: &Persistence) -> Result<SyncOutcome> {
    let Some(spreadsheet_id) = non_blank(cfg.spreadsheet_id.as_deref()) else {
        return Ok(SyncOutcome::Skipped("spreadsheet id not configured"));
    };
    let Some(key) = ServiceAccountKey::from_config(cfg)? else {
        return Ok(SyncOutcome::Skipped("service account not configured"));
    };
    let Some(store) = persistence.store() else {
        return Ok(SyncOutcome::Skipped("persistence not configured"));
    };

    let items = store
        .transaction(|tx| tx.list_recent(SYNC_ITEM_LIMIT))
        .await?;
    let client = SheetsClient::new(spreadsheet_id, key)?;
    let report = client.sync_items(&items).await?;
    tracing::info!(tabs_updated = report.tabs_updated, tabs = ?report.tabs, "sheets sync completed");
    Ok(SyncOutcome::Synced(report))
}
