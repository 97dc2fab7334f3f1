use crate::traits::Messenger;
use crate::types::{CallbackId, ChatId, FileId, InlineButton, OutboundMessage};
use anyhow::{Result, anyhow};
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://api.telegram.org";
const TELEGRAM_API_TIMEOUT: Duration = Duration::from_secs(20);
const TELEGRAM_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct TelegramBotApi {
    http: reqwest::Client,
    api_base_url: String,
    bot_token: String,
}

impl TelegramBotApi {
    pub fn new(bot_token: &str) -> Result<Self> {
        Self::with_base_url(bot_token, DEFAULT_API_BASE_URL)
    }

    pub fn with_base_url(bot_token: &str, api_base_url: &str) -> Result<Self> {
        let bot_token = bot_token.trim();
        if bot_token.is_empty() {
            return Err(anyhow!("telegram bot token is required"));
        }
        let http = reqwest::Client::builder()
            .timeout(TELEGRAM_DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
        })
    }

    fn api_url(&self, method: &str) -> Result<Url> {
        Ok(Url::parse(&format!(
            "{}/bot{}/{}",
            self.api_base_url, self.bot_token, method
        ))?)
    }

    fn file_url(&self, file_path: &str) -> Result<Url> {
        Ok(Url::parse(&format!(
            "{}/file/bot{}/{}",
            self.api_base_url,
            self.bot_token,
            file_path.trim_start_matches('/')
        ))?)
    }

    /// Register `url` as the webhook target; Telegram echoes `secret_token` back in
    /// `X-Telegram-Bot-Api-Secret-Token` on every delivery.
    #[tracing::instrument(level = "info", skip_all, fields(url = %url))]
    pub async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> Result<()> {
        let mut body = serde_json::json!({
            "url": url,
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(secret) = secret_token.map(str::trim).filter(|s| !s.is_empty()) {
            body["secret_token"] = serde_json::Value::String(secret.to_string());
        }
        self.call::<bool>("setWebhook", &body).await?;
        Ok(())
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let url = self.api_url(method)?;
        let resp = self
            .http
            .post(url)
            .timeout(TELEGRAM_API_TIMEOUT)
            .json(body)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;
        let status = resp.status();
        let text = resp.text().await.map_err(reqwest::Error::without_url)?;
        if !status.is_success() {
            return Err(anyhow!(
                "telegram {method} failed: status={status} body={text}"
            ));
        }
        parse_api_response(method, &text)
    }
}

#[async_trait::async_trait]
impl Messenger for TelegramBotApi {
    #[tracing::instrument(level = "info", skip_all, fields(chat_id = %chat_id))]
    async fn send(&self, chat_id: ChatId, message: OutboundMessage) -> Result<()> {
        let body = send_message_payload(chat_id, &message);
        self.call::<serde_json::Value>("sendMessage", &body).await?;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn answer_callback(&self, callback_id: &CallbackId, text: Option<&str>) -> Result<()> {
        let mut body = serde_json::json!({ "callback_query_id": callback_id.as_str() });
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            body["text"] = serde_json::Value::String(text.to_string());
            body["show_alert"] = serde_json::Value::Bool(false);
        }
        self.call::<bool>("answerCallbackQuery", &body).await?;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn resolve_file(&self, file_id: &FileId) -> Result<String> {
        let body = serde_json::json!({ "file_id": file_id.as_str() });
        let file: TelegramFile = self.call("getFile", &body).await?;
        file.file_path
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow!("telegram getFile returned no file_path for {file_id}"))
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn download(&self, file_path: &str) -> Result<Vec<u8>> {
        let url = self.file_url(file_path)?;
        let resp = self
            .http
            .get(url)
            .timeout(TELEGRAM_DOWNLOAD_TIMEOUT)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("telegram file download failed: status={status}"));
        }
        let bytes = resp.bytes().await.map_err(reqwest::Error::without_url)?;
        tracing::debug!(bytes = bytes.len(), "telegram file downloaded");
        Ok(bytes.to_vec())
    }
}

fn send_message_payload(chat_id: ChatId, message: &OutboundMessage) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "chat_id": chat_id.get(),
        "text": message.text,
        "disable_web_page_preview": true,
    });
    if !message.buttons.is_empty() {
        payload["reply_markup"] = serde_json::json!({
            "inline_keyboard": inline_keyboard(&message.buttons),
        });
    }
    // Bots cannot edit user messages; replying is the closest "accepted" marker.
    if let Some(reply_to) = message.reply_to {
        payload["reply_to_message_id"] = serde_json::json!(reply_to.get());
    }
    payload
}

fn inline_keyboard(rows: &[Vec<InlineButton>]) -> serde_json::Value {
    serde_json::Value::Array(
        rows.iter()
            .map(|row| {
                serde_json::Value::Array(
                    row.iter()
                        .map(|button| {
                            serde_json::json!({
                                "text": button.text,
                                "callback_data": button.callback_data,
                            })
                        })
                        .collect(),
                )
            })
            .collect(),
    )
}

fn parse_api_response<T: for<'de> Deserialize<'de>>(method: &str, body: &str) -> Result<T> {
    let envelope: TelegramEnvelope<T> = serde_json::from_str(body)
        .map_err(|e| anyhow!("telegram {method} returned invalid json: {e}"))?;
    if !envelope.ok {
        return Err(anyhow!(
            "telegram {method} rejected: {}",
            envelope
                .description
                .unwrap_or_else(|| "no description".to_string())
        ));
    }
    envelope
        .result
        .ok_or_else(|| anyhow!("telegram {method} response missing result"))
}

#[derive(Debug, Deserialize)]
struct TelegramEnvelope<T> {
    ok: bool,
    #[serde(default = "Option::default")]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramFile {
    #[serde(default)]
    file_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{TelegramBotApi, TelegramFile, parse_api_response, send_message_payload};
    use crate::traits::Messenger;
    use crate::types::{ChatId, InlineButton, MessageId, OutboundMessage};

    /// Base URL of a local port that refuses connections.
    fn closed_port_base_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        format!("http://{addr}")
    }

    #[test]
    fn send_payload_includes_keyboard_and_reply_reference() {
        let message = OutboundMessage::text("Открытые задачи")
            .replying_to(Some(MessageId::new(11)))
            .with_buttons(vec![vec![InlineButton {
                text: "✅ Закрыть 1".to_string(),
                callback_data: "done:abc".to_string(),
            }]]);
        let payload = send_message_payload(ChatId::new(-42), &message);

        assert_eq!(payload["chat_id"], -42);
        assert_eq!(payload["disable_web_page_preview"], true);
        assert_eq!(payload["reply_to_message_id"], 11);
        assert_eq!(
            payload["reply_markup"]["inline_keyboard"][0][0]["callback_data"],
            "done:abc"
        );
    }

    #[test]
    fn plain_send_payload_has_no_markup() {
        let payload = send_message_payload(ChatId::new(1), &OutboundMessage::text("hi"));
        assert!(payload.get("reply_markup").is_none());
        assert!(payload.get("reply_to_message_id").is_none());
    }

    #[test]
    fn api_envelope_errors_carry_description() {
        let err = parse_api_response::<bool>(
            "answerCallbackQuery",
            r#"{"ok":false,"description":"query is too old"}"#,
        )
        .expect_err("must fail");
        assert!(err.to_string().contains("query is too old"));

        let file: TelegramFile = parse_api_response(
            "getFile",
            r#"{"ok":true,"result":{"file_id":"x","file_path":"voice/file_1.oga"}}"#,
        )
        .expect("getFile result");
        assert_eq!(file.file_path.as_deref(), Some("voice/file_1.oga"));
    }

    #[test]
    fn urls_embed_token_and_normalize_paths() {
        let api = TelegramBotApi::with_base_url("123:abc", "http://localhost:8081/").expect("api");
        assert_eq!(
            api.api_url("getFile").expect("url").as_str(),
            "http://localhost:8081/bot123:abc/getFile"
        );
        assert_eq!(
            api.file_url("/voice/file_1.oga").expect("url").as_str(),
            "http://localhost:8081/file/bot123:abc/voice/file_1.oga"
        );
    }

    #[test]
    fn blank_token_is_rejected() {
        assert!(TelegramBotApi::new("  ").is_err());
    }

    #[tokio::test]
    async fn transport_errors_do_not_leak_the_bot_token() {
        let token = "123456:SECRET_TOKEN";
        let api = TelegramBotApi::with_base_url(token, &closed_port_base_url()).expect("api");

        let err = api
            .send(ChatId::new(1), OutboundMessage::text("hi"))
            .await
            .expect_err("connection must fail");
        let rendered = format!("{err:#} {err:?}");
        assert!(!rendered.contains("SECRET_TOKEN"), "{rendered}");

        let err = api
            .download("voice/file_1.oga")
            .await
            .expect_err("connection must fail");
        let rendered = format!("{err:#} {err:?}");
        assert!(!rendered.contains("SECRET_TOKEN"), "{rendered}");
    }
}
