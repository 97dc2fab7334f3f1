//! H-2000 configuration loader.
//!
//! Load order: TOML file (optional), then non-blank environment overrides, then validation.

use chrono_tz::Tz;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub groq: GroqConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub shortcuts: ShortcutsConfig,
    #[serde(default)]
    pub sheets: SheetsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// IANA zone; drives the daily sync schedule and is echoed to reminder clients.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "Europe/Moscow".to_string()
}

impl GeneralConfig {
    pub fn tz(&self) -> anyhow::Result<Tz> {
        self.timezone
            .trim()
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("invalid general.timezone {:?}: {e}", self.timezone))
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    /// Budget for processing one webhook update end to end.
    #[serde(default = "default_update_timeout_seconds")]
    pub update_timeout_seconds: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    55
}

fn default_update_timeout_seconds() -> u64 {
    50
}

fn default_max_in_flight() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            http_timeout_seconds: default_http_timeout_seconds(),
            update_timeout_seconds: default_update_timeout_seconds(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl ServerConfig {
    pub fn update_timeout(&self) -> Duration {
        Duration::from_secs(self.update_timeout_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_telegram_api_base_url")]
    pub api_base_url: String,
}

fn default_telegram_api_base_url() -> String {
    hx_channels::DEFAULT_API_BASE_URL.to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            webhook_secret: None,
            api_base_url: default_telegram_api_base_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroqConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_groq_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    #[serde(default = "default_groq_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_groq_base_url() -> String {
    hx_llm::DEFAULT_BASE_URL.to_string()
}

fn default_chat_model() -> String {
    "llama-3.1-8b-instant".to_string()
}

fn default_transcription_model() -> String {
    "whisper-large-v3".to_string()
}

fn default_groq_request_timeout_seconds() -> u64 {
    60
}

impl Default for GroqConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_groq_base_url(),
            chat_model: default_chat_model(),
            transcription_model: default_transcription_model(),
            request_timeout_seconds: default_groq_request_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file. Unset disables persistence.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShortcutsConfig {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SheetsConfig {
    #[serde(default = "default_sheets_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
    /// Base64 of the service-account JSON; preferred over the raw form.
    #[serde(default)]
    pub service_account_json_b64: Option<String>,
    #[serde(default)]
    pub service_account_json: Option<String>,
    /// Local `HH:MM`.
    #[serde(default = "default_sync_time")]
    pub sync_time: String,
}

fn default_sheets_enabled() -> bool {
    true
}

fn default_sync_time() -> String {
    "06:00".to_string()
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            enabled: default_sheets_enabled(),
            spreadsheet_id: None,
            service_account_json_b64: None,
            service_account_json: None,
            sync_time: default_sync_time(),
        }
    }
}

impl SheetsConfig {
    /// Both a spreadsheet id and some form of credentials are present.
    pub fn is_configured(&self) -> bool {
        non_blank(self.spreadsheet_id.as_deref()).is_some()
            && (non_blank(self.service_account_json_b64.as_deref()).is_some()
                || non_blank(self.service_account_json.as_deref()).is_some())
    }

    /// `(hour, minute)` of the daily run; unparseable values fall back to 06:00.
    pub fn sync_hour_minute(&self) -> (u32, u32) {
        parse_hour_minute(&self.sync_time).unwrap_or((6, 0))
    }
}

fn parse_hour_minute(raw: &str) -> Option<(u32, u32)> {
    let (hh, mm) = raw.trim().split_once(':')?;
    let hour = hh.trim().parse::<u32>().ok()?;
    let minute = mm.trim().parse::<u32>().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

fn parse_bool_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl AppConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let explicit = path.is_some();
        let path = path.unwrap_or_else(default_config_path);

        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => toml::from_str::<AppConfig>(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                AppConfig::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_env_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = v.trim().to_string();
        }
        if let Some(v) = var("TELEGRAM_WEBHOOK_SECRET") {
            self.telegram.webhook_secret = Some(v);
        }
        if let Some(v) = var("GROQ_API_KEY") {
            self.groq.api_key = Some(v.trim().to_string());
        }
        if let Some(v) = var("GROQ_BASE_URL") {
            self.groq.base_url = v;
        }
        if let Some(v) = var("GROQ_CHAT_MODEL") {
            self.groq.chat_model = v;
        }
        if let Some(v) = var("GROQ_TRANSCRIPTION_MODEL") {
            self.groq.transcription_model = v;
        }
        if let Some(v) = var("DATABASE_PATH") {
            self.database.path = Some(v);
        }
        if let Some(v) = var("SHORTCUTS_TOKEN") {
            self.shortcuts.token = Some(v);
        }
        if let Some(v) = var("TZ") {
            self.general.timezone = v.trim().to_string();
        }
        if let Some(v) = var("PORT") {
            match v.trim().parse::<u16>() {
                Ok(port) => self.server.bind_addr = format!("0.0.0.0:{port}"),
                Err(e) => tracing::warn!(value = %v, %e, "ignoring invalid PORT"),
            }
        }
        if let Some(v) = var("BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = var("GOOGLE_SHEETS_ID") {
            self.sheets.spreadsheet_id = Some(v);
        }
        if let Some(v) = var("GOOGLE_SHEETS_SA_JSON_B64") {
            self.sheets.service_account_json_b64 = Some(v);
        }
        if let Some(v) = var("GOOGLE_SHEETS_SA_JSON") {
            self.sheets.service_account_json = Some(v);
        }
        if let Some(v) = var("GOOGLE_SHEETS_SYNC_TIME") {
            self.sheets.sync_time = v;
        }
        if let Some(v) = var("GOOGLE_SHEETS_SYNC_ENABLED") {
            self.sheets.enabled = parse_bool_flag(&v);
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.server.http_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("server.http_timeout_seconds must be > 0"));
        }
        if self.server.update_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("server.update_timeout_seconds must be > 0"));
        }
        if self.server.max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.max_in_flight must be > 0"));
        }
        if self.groq.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("groq.request_timeout_seconds must be > 0"));
        }
        self.general.tz()?;
        self.bind_addr()?;
        Ok(())
    }

    /// Extra checks that only apply when running the webhook server.
    pub fn validate_for_serve(&self) -> anyhow::Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "telegram.bot_token is required (or set TELEGRAM_BOT_TOKEN)"
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server
            .bind_addr
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid server.bind_addr {:?}: {e}", self.server.bind_addr))
    }

    pub fn groq_api_key(&self) -> Option<&str> {
        non_blank(self.groq.api_key.as_deref())
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        non_blank(self.telegram.webhook_secret.as_deref())
    }

    pub fn shortcuts_token(&self) -> Option<&str> {
        non_blank(self.shortcuts.token.as_deref())
    }

    pub fn database_path(&self) -> Option<&str> {
        non_blank(self.database.path.as_deref())
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".hx2000").join("config.toml")
}
