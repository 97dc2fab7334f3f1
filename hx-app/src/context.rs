//! Process-wide immutable context, built once from [`AppConfig`].

use crate::backend::GenerativeBackend;
use crate::config::AppConfig;
use crate::store::ItemStore;
use anyhow::{Context, Result};
use hx_channels::{Messenger, TelegramBotApi};
use hx_llm::{LlmClient, LlmClientConfig};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub enum Generative {
    NotConfigured,
    Configured(Arc<dyn GenerativeBackend>),
}

impl Generative {
    pub fn is_configured(&self) -> bool {
        matches!(self, Generative::Configured(_))
    }
}

#[derive(Clone)]
pub enum Persistence {
    NotConfigured,
    Sqlite(ItemStore),
}

impl Persistence {
    pub fn store(&self) -> Option<&ItemStore> {
        match self {
            Persistence::NotConfigured => None,
            Persistence::Sqlite(store) => Some(store),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.store().is_some()
    }
}

#[derive(Clone)]
pub struct AppContext {
    pub messenger: Arc<dyn Messenger>,
    pub generative: Generative,
    pub persistence: Persistence,
    pub update_timeout: Duration,
}

impl AppContext {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let messenger = TelegramBotApi::with_base_url(
            &cfg.telegram.bot_token,
            &cfg.telegram.api_base_url,
        )
        .context("build telegram client")?;
        Ok(Self {
            messenger: Arc::new(messenger),
            generative: build_generative(cfg)?,
            persistence: build_persistence(cfg)?,
            update_timeout: cfg.server.update_timeout(),
        })
    }
}

pub fn build_generative(cfg: &AppConfig) -> Result<Generative> {
    let Some(api_key) = cfg.groq_api_key() else {
        tracing::warn!("GROQ_API_KEY not set; extraction runs in heuristic mode and voice is skipped");
        return Ok(Generative::NotConfigured);
    };
    let client = LlmClient::new(LlmClientConfig {
        base_url: cfg.groq.base_url.clone(),
        api_key: api_key.to_string(),
        chat_model: cfg.groq.chat_model.clone(),
        transcription_model: cfg.groq.transcription_model.clone(),
        request_timeout: Duration::from_secs(cfg.groq.request_timeout_seconds),
    })
    .context("build generative client")?;
    Ok(Generative::Configured(Arc::new(client)))
}

pub fn build_persistence(cfg: &AppConfig) -> Result<Persistence> {
    let Some(path) = cfg.database_path() else {
        tracing::warn!("database.path not set; capture replies with a not-configured notice");
        return Ok(Persistence::NotConfigured);
    };
    let store = ItemStore::open(path).with_context(|| format!("open item store {path}"))?;
    Ok(Persistence::Sqlite(store))
}
