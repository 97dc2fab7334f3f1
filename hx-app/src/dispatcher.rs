//! Update dispatcher: decides the route for one inbound update and runs it to completion.
//!
//! Every path ends in `Ok` or a logged `Err`; the transport layer always answers success.

use crate::commands::{
    self, BAD_CALLBACK_TEXT, CLOSED_TEXT, Command, DONE_LIST_LIMIT, HELP_TEXT, NOT_CONFIGURED_TEXT,
    NOT_FOUND_TEXT,
};
use crate::context::AppContext;
use crate::extraction;
use crate::horizon;
use crate::item::{ItemId, ItemKind, NewItem};
use crate::store::{CloseOutcome, OpenItemsFilter};
use crate::transcription::{self, VoiceText};
use anyhow::Result;
use hx_channels::{CallbackQuery, Chat, ChatId, Message, OutboundMessage, Update, User, UserId};

/// Who sent the update and where replies go. A missing side falls back to the other, which is
/// exact for private chats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    pub user_id: UserId,
    pub chat_id: ChatId,
}

impl Origin {
    fn from_parts(user: Option<&User>, chat: Option<&Chat>) -> Option<Self> {
        match (user.map(|u| u.id), chat.map(|c| c.id)) {
            (Some(user_id), Some(chat_id)) => Some(Self { user_id, chat_id }),
            (Some(user_id), None) => Some(Self {
                user_id,
                chat_id: ChatId::new(user_id.get()),
            }),
            (None, Some(chat_id)) => Some(Self {
                user_id: UserId::new(chat_id.get()),
                chat_id,
            }),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Route<'a> {
    Callback {
        origin: Origin,
        query: &'a CallbackQuery,
    },
    Command {
        origin: Origin,
        command: Command,
        message: &'a Message,
    },
    Capture {
        origin: Origin,
        message: &'a Message,
    },
}

/// Callback beats command beats capture. `None` means there is nothing addressable to act on.
pub fn route(update: &Update) -> Option<Route<'_>> {
    if let Some(query) = update.callback_query.as_ref() {
        let chat = query.message.as_ref().and_then(|m| m.chat.as_ref());
        let origin = Origin::from_parts(query.from.as_ref(), chat)?;
        return Some(Route::Callback { origin, query });
    }

    let message = update.message.as_ref()?;
    let origin = Origin::from_parts(message.from.as_ref(), message.chat.as_ref())?;
    if let Some(command) = message.text.as_deref().and_then(commands::parse_command) {
        return Some(Route::Command {
            origin,
            command,
            message,
        });
    }
    Some(Route::Capture { origin, message })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Ignored,
    Replied,
    CallbackAnswered,
    Captured(ItemId),
    Dropped,
    NotConfigured,
}

#[derive(Clone)]
pub struct Dispatcher {
    ctx: AppContext,
}

impl Dispatcher {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Decode and dispatch one raw webhook body under the update budget. Never fails.
    #[tracing::instrument(level = "info", skip_all, fields(update_id = tracing::field::Empty))]
    pub async fn handle_raw(&self, raw: serde_json::Value) {
        let update: Update = match serde_json::from_value(raw.clone()) {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!(%e, "discarding undecodable update");
                return;
            }
        };
        tracing::Span::current().record("update_id", update.update_id);

        match tokio::time::timeout(self.ctx.update_timeout, self.dispatch(&update, &raw)).await {
            Ok(Ok(outcome)) => tracing::info!(?outcome, "update handled"),
            Ok(Err(e)) => tracing::error!(error = %format!("{e:#}"), "update failed"),
            Err(_) => tracing::error!(
                budget_seconds = self.ctx.update_timeout.as_secs(),
                "update abandoned after timeout"
            ),
        }
    }

    pub async fn dispatch(
        &self,
        update: &Update,
        raw: &serde_json::Value,
    ) -> Result<DispatchOutcome> {
        let Some(route) = route(update) else {
            tracing::debug!("update has neither sender nor chat");
            return Ok(DispatchOutcome::Ignored);
        };
        match route {
            Route::Callback { origin, query } => self.handle_callback(origin, query).await,
            Route::Command {
                origin,
                command,
                message,
            } => self.handle_command(origin, command, message).await,
            Route::Capture { origin, message } => self.handle_capture(origin, message, raw).await,
        }
    }

    #[tracing::instrument(level = "info", skip_all, fields(user_id = %origin.user_id))]
    async fn handle_callback(
        &self,
        origin: Origin,
        query: &CallbackQuery,
    ) -> Result<DispatchOutcome> {
        let messenger = &self.ctx.messenger;
        let Some(item_id) = query.data.as_deref().and_then(commands::parse_close_callback) else {
            tracing::warn!(data = ?query.data, "malformed callback payload");
            messenger
                .answer_callback(&query.id, Some(BAD_CALLBACK_TEXT))
                .await?;
            return Ok(DispatchOutcome::CallbackAnswered);
        };
        let Some(store) = self.ctx.persistence.store() else {
            messenger
                .answer_callback(&query.id, Some(NOT_CONFIGURED_TEXT))
                .await?;
            return Ok(DispatchOutcome::NotConfigured);
        };

        let owner = origin.user_id.get();
        let outcome = store
            .transaction(move |tx| match tx.get(item_id)? {
                Some(item) if item.source_user_id == owner => tx.close(item_id),
                _ => Ok(CloseOutcome::NotFound),
            })
            .await?;

        let text = match &outcome {
            CloseOutcome::Closed(_) => {
                tracing::info!(%item_id, "item closed");
                CLOSED_TEXT
            }
            CloseOutcome::AlreadyClosed(_) => {
                tracing::debug!(%item_id, "item already closed");
                CLOSED_TEXT
            }
            CloseOutcome::NotFound => NOT_FOUND_TEXT,
        };
        messenger.answer_callback(&query.id, Some(text)).await?;
        Ok(DispatchOutcome::CallbackAnswered)
    }

    #[tracing::instrument(level = "info", skip_all, fields(command = ?command))]
    async fn handle_command(
        &self,
        origin: Origin,
        command: Command,
        message: &Message,
    ) -> Result<DispatchOutcome> {
        let reply = match command {
            Command::Start | Command::Help => OutboundMessage::text(HELP_TEXT),
            Command::Done => match self.ctx.persistence.store() {
                None => OutboundMessage::text(NOT_CONFIGURED_TEXT),
                Some(store) => {
                    let filter = OpenItemsFilter {
                        user_id: Some(origin.user_id.get()),
                        kind: Some(ItemKind::Task),
                        ..OpenItemsFilter::default()
                    };
                    let items = store
                        .transaction(move |tx| tx.list_open(&filter, DONE_LIST_LIMIT))
                        .await?;
                    commands::render_open_tasks(&items)
                }
            },
        };
        self.ctx
            .messenger
            .send(origin.chat_id, reply.replying_to(message.message_id))
            .await?;
        Ok(DispatchOutcome::Replied)
    }

    #[tracing::instrument(level = "info", skip_all, fields(chat_id = %origin.chat_id))]
    async fn handle_capture(
        &self,
        origin: Origin,
        message: &Message,
        raw: &serde_json::Value,
    ) -> Result<DispatchOutcome> {
        let voice = match message.voice_file() {
            Some(file) => Some(
                transcription::process_voice(
                    self.ctx.messenger.as_ref(),
                    &self.ctx.generative,
                    file,
                )
                .await?,
            ),
            None => None,
        };

        let working_text = voice
            .as_ref()
            .map(|v| v.text.trim())
            .filter(|text| !text.is_empty())
            .or_else(|| message.text_content())
            .map(str::to_string);
        let Some(text) = working_text else {
            tracing::debug!(voice = voice.is_some(), "nothing to capture");
            return Ok(DispatchOutcome::Dropped);
        };

        let Some(store) = self.ctx.persistence.store() else {
            self.ctx
                .messenger
                .send(
                    origin.chat_id,
                    OutboundMessage::text(NOT_CONFIGURED_TEXT).replying_to(message.message_id),
                )
                .await?;
            return Ok(DispatchOutcome::NotConfigured);
        };

        let extracted = extraction::extract(&self.ctx.generative, &text).await?;
        let horizon_tag = extracted
            .horizon_tag
            .or_else(|| horizon::resolve(&text));
        let transcript = voice
            .as_ref()
            .map(|VoiceText { transcript, .. }| transcript.clone())
            .filter(|t| !t.is_empty());

        let new_item = NewItem {
            source_user_id: origin.user_id.get(),
            source_chat_id: origin.chat_id.get(),
            source_message_id: message.message_id.map(|id| id.get()),
            kind: extracted.kind,
            horizon_tag,
            text,
            transcript,
            summary: extracted.summary,
            title: extracted.title,
            raw_payload: raw.clone(),
        };
        let item = store.transaction(move |tx| tx.create(new_item)).await?;
        tracing::info!(item_id = %item.id, kind = %item.kind, horizon = ?item.horizon_tag, "item captured");

        let ack = commands::render_capture_ack(&item, voice.is_some());
        self.ctx
            .messenger
            .send(
                origin.chat_id,
                OutboundMessage::text(ack).replying_to(message.message_id),
            )
            .await?;
        Ok(DispatchOutcome::Captured(item.id))
    }
}
