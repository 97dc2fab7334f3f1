//! In-process fakes for the messaging and generative collaborators.

use crate::backend::GenerativeBackend;
use crate::context::{AppContext, Generative, Persistence};
use crate::store::ItemStore;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use hx_channels::{CallbackId, ChatId, FileId, Messenger, OutboundMessage};
use hx_llm::ChatOptions;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct AnsweredCallback {
    pub callback_id: String,
    pub text: Option<String>,
}

#[derive(Default)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<(ChatId, OutboundMessage)>>,
    pub answered: Mutex<Vec<AnsweredCallback>>,
    pub audio: Option<Vec<u8>>,
    pub fail_sends: bool,
}

impl RecordingMessenger {
    pub fn with_audio(audio: &[u8]) -> Self {
        Self {
            audio: Some(audio.to_vec()),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(ChatId, OutboundMessage)> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn answered(&self) -> Vec<AnsweredCallback> {
        self.answered.lock().expect("answered lock").clone()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(&self, chat_id: ChatId, message: OutboundMessage) -> Result<()> {
        if self.fail_sends {
            return Err(anyhow!("send failed"));
        }
        self.sent.lock().expect("sent lock").push((chat_id, message));
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &CallbackId, text: Option<&str>) -> Result<()> {
        self.answered
            .lock()
            .expect("answered lock")
            .push(AnsweredCallback {
                callback_id: callback_id.to_string(),
                text: text.map(str::to_string),
            });
        Ok(())
    }

    async fn resolve_file(&self, file_id: &FileId) -> Result<String> {
        if self.audio.is_none() {
            return Err(anyhow!("file {file_id} unavailable"));
        }
        Ok(format!("voice/{file_id}.oga"))
    }

    async fn download(&self, _file_path: &str) -> Result<Vec<u8>> {
        self.audio.clone().ok_or_else(|| anyhow!("download failed"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCompletion {
    pub system: String,
    pub user: String,
    pub options: ChatOptions,
}

/// Returns queued completions in order; an exhausted queue is an error.
#[derive(Default)]
pub struct ScriptedBackend {
    pub transcript: String,
    pub completions: Mutex<VecDeque<Result<String>>>,
    pub calls: Mutex<Vec<RecordedCompletion>>,
    pub transcriptions: Mutex<u32>,
}

impl ScriptedBackend {
    pub fn new(transcript: &str, completions: Vec<Result<String>>) -> Self {
        Self {
            transcript: transcript.to_string(),
            completions: Mutex::new(completions.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<RecordedCompletion> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn transcriptions(&self) -> u32 {
        *self.transcriptions.lock().expect("transcriptions lock")
    }
}

#[async_trait]
impl GenerativeBackend for ScriptedBackend {
    async fn transcribe(&self, _audio: Vec<u8>, _filename: &str) -> Result<String> {
        *self.transcriptions.lock().expect("transcriptions lock") += 1;
        Ok(self.transcript.clone())
    }

    async fn complete(&self, system: &str, user: &str, options: ChatOptions) -> Result<String> {
        self.calls.lock().expect("calls lock").push(RecordedCompletion {
            system: system.to_string(),
            user: user.to_string(),
            options,
        });
        self.completions
            .lock()
            .expect("completions lock")
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("no scripted completion left")))
    }
}

pub fn context(
    messenger: Arc<RecordingMessenger>,
    generative: Generative,
    store: Option<ItemStore>,
) -> AppContext {
    AppContext {
        messenger,
        generative,
        persistence: store.map_or(Persistence::NotConfigured, Persistence::Sqlite),
        update_timeout: Duration::from_secs(5),
    }
}

pub fn scripted(backend: &Arc<ScriptedBackend>) -> Generative {
    Generative::Configured(backend.clone())
}
