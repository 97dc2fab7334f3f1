use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ChatOptions, ChatResponse, Role, Usage};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatClient {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %model))]
    pub async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<ChatResponse> {
        let req = OpenAiChatRequest::new(model, messages, options);

        let response = self
            .http
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Status {
                endpoint: "chat/completions",
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OpenAiChatResponse = serde_json::from_str(&body)?;
        parsed.try_into()
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %model, audio_bytes = audio.len()))]
    pub async fn transcribe(&self, model: &str, audio: Vec<u8>, filename: &str) -> Result<String> {
        let part = Part::bytes(audio)
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")?;
        let form = Form::new()
            .part("file", part)
            .text("model", model.to_string());

        let response = self
            .http
            .post(self.endpoint("audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Status {
                endpoint: "audio/transcriptions",
                status: status.as_u16(),
                body,
            });
        }

        parse_transcription(&body)
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAiResponseFormat>,
}

#[derive(Debug, Serialize)]
struct OpenAiResponseFormat {
    r#type: String,
}

impl OpenAiChatRequest {
    fn new(model: &str, messages: &[ChatMessage], options: ChatOptions) -> Self {
        Self {
            model: model.to_string(),
            messages: messages.iter().map(to_openai_message).collect(),
            temperature: options.temperature,
            response_format: options.json_object.then(|| OpenAiResponseFormat {
                r#type: "json_object".to_string(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

fn to_openai_message(m: &ChatMessage) -> OpenAiMessage {
    let role = match m.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    OpenAiMessage {
        role: role.to_string(),
        content: m.content.clone(),
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    message: Option<OpenAiChoiceMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl TryFrom<OpenAiChatResponse> for ChatResponse {
    type Error = LlmError;

    fn try_from(v: OpenAiChatResponse) -> Result<Self> {
        let choice = v.choices.into_iter().next().ok_or_else(|| {
            LlmError::ResponseFormat("chat response missing choices".to_string())
        })?;

        let usage = v.usage.unwrap_or(OpenAiUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });

        Ok(ChatResponse {
            message: ChatMessage {
                role: Role::Assistant,
                content: choice
                    .message
                    .and_then(|m| m.content)
                    .unwrap_or_default(),
            },
            usage: Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
            finish_reason: choice
                .finish_reason
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiTranscriptionResponse {
    #[serde(default)]
    text: Option<String>,
}

fn parse_transcription(body: &str) -> Result<String> {
    let parsed: OpenAiTranscriptionResponse = serde_json::from_str(body)?;
    Ok(parsed.text.unwrap_or_default().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::{OpenAiChatRequest, OpenAiChatResponse, parse_transcription};
    use crate::error::LlmError;
    use crate::types::{ChatMessage, ChatOptions, ChatResponse};

    #[test]
    fn json_mode_request_carries_response_format_and_temperature() {
        let messages = vec![ChatMessage::system("rules"), ChatMessage::user("hello")];
        let req = OpenAiChatRequest::new(
            "llama-3.1-8b-instant",
            &messages,
            ChatOptions {
                temperature: Some(0.2),
                json_object: true,
            },
        );
        let value = serde_json::to_value(&req).expect("serialize request");
        assert_eq!(value["model"], "llama-3.1-8b-instant");
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hello");
        assert!(value["temperature"].is_number());
    }

    #[test]
    fn plain_request_omits_optional_fields() {
        let messages = vec![ChatMessage::user("hello")];
        let req = OpenAiChatRequest::new("m", &messages, ChatOptions::default());
        let value = serde_json::to_value(&req).expect("serialize request");
        assert!(value.get("response_format").is_none());
        assert!(value.get("temperature").is_none());
    }

    #[test]
    fn response_without_choices_is_a_format_error() {
        let parsed: OpenAiChatResponse =
            serde_json::from_str(r#"{"choices":[]}"#).expect("parse response");
        let err = ChatResponse::try_from(parsed).expect_err("missing choices must fail");
        assert!(matches!(err, LlmError::ResponseFormat(_)));
    }

    #[test]
    fn response_with_null_content_becomes_empty_string() {
        let parsed: OpenAiChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":null},"finish_reason":"stop"}]}"#,
        )
        .expect("parse response");
        let resp = ChatResponse::try_from(parsed).expect("convert response");
        assert_eq!(resp.message.content, "");
        assert_eq!(resp.finish_reason, "stop");
        assert_eq!(resp.usage.prompt_tokens, 0);
    }

    #[test]
    fn transcription_text_is_trimmed_and_defaults_to_empty() {
        assert_eq!(
            parse_transcription(r#"{"text":"  купить хлеб  "}"#).expect("parse"),
            "купить хлеб"
        );
        assert_eq!(parse_transcription("{}").expect("parse"), "");
        assert!(parse_transcription("not json").is_err());
    }
}
