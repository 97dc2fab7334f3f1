//! Chat commands, callback payloads and the user-facing reply texts.

use crate::item::{Item, ItemId, truncate_chars};
use hx_channels::{InlineButton, OutboundMessage};
use uuid::Uuid;

pub const DONE_LIST_LIMIT: u32 = 10;
const CLOSE_CALLBACK_PREFIX: &str = "done:";
const LIST_TITLE_MAX_CHARS: usize = 80;
const ACK_TEXT_MAX_CHARS: usize = 1000;

pub const HELP_TEXT: &str = "Х-2000 на связи.\n\n\
Пришли текст или голосовое, и я сохраню это как задачу, идею или заметку.\n\
Горизонт можно указать тегом: #неделя, #месяц, #квартал, #год.\n\n\
/done: открытые задачи с кнопками ✅ Закрыть";
pub const NO_OPEN_TASKS_TEXT: &str = "Открытых задач нет.";
pub const NOT_CONFIGURED_TEXT: &str = "Хранилище не настроено, сохранить ничего не получится.";
pub const CLOSED_TEXT: &str = "Закрыто ✅";
pub const NOT_FOUND_TEXT: &str = "Запись не найдена.";
pub const BAD_CALLBACK_TEXT: &str = "Не понял кнопку.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Done,
}

/// Case-sensitive match on the first token; `/done@my_bot` is accepted.
pub fn parse_command(text: &str) -> Option<Command> {
    let token = text.split_whitespace().next()?;
    let name = match token.split_once('@') {
        Some((name, bot)) if !bot.is_empty() => name,
        Some(_) => return None,
        None => token,
    };
    match name {
        "/start" => Some(Command::Start),
        "/help" => Some(Command::Help),
        "/done" => Some(Command::Done),
        _ => None,
    }
}

pub fn close_callback_data(id: ItemId) -> String {
    format!("{CLOSE_CALLBACK_PREFIX}{id}")
}

pub fn parse_close_callback(data: &str) -> Option<ItemId> {
    let raw = data.trim().strip_prefix(CLOSE_CALLBACK_PREFIX)?;
    Uuid::parse_str(raw.trim()).ok()
}

/// Numbered list of open tasks with one close button per line.
pub fn render_open_tasks(items: &[Item]) -> OutboundMessage {
    if items.is_empty() {
        return OutboundMessage::text(NO_OPEN_TASKS_TEXT);
    }

    let mut text = String::from("Открытые задачи:");
    let mut buttons = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let n = idx + 1;
        text.push_str(&format!("\n{n}. {}", item.display_title(LIST_TITLE_MAX_CHARS)));
        if let Some(horizon) = item.horizon_tag {
            text.push(' ');
            text.push_str(horizon.marker());
        }
        buttons.push(vec![InlineButton {
            text: format!("✅ Закрыть {n}"),
            callback_data: close_callback_data(item.id),
        }]);
    }
    OutboundMessage::text(text).with_buttons(buttons)
}

/// Capture acknowledgment. Voice input also echoes the cleaned text and summary.
pub fn render_capture_ack(item: &Item, from_voice: bool) -> String {
    let horizon = item
        .horizon_tag
        .map_or("без горизонта", |horizon| horizon.marker());
    let mut text = format!("Сохранено: {} {horizon}", item.kind.label());
    if from_voice {
        text.push_str("\n\n");
        text.push_str(truncate_chars(&item.text, ACK_TEXT_MAX_CHARS));
        if let Some(summary) = item.summary.as_deref().filter(|s| !s.trim().is_empty()) {
            text.push_str("\n\nКратко: ");
            text.push_str(summary.trim());
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::{
        Command, NO_OPEN_TASKS_TEXT, close_callback_data, parse_close_callback, parse_command,
        render_capture_ack, render_open_tasks,
    };
    use crate::horizon::Horizon;
    use crate::item::{Item, ItemKind, ItemStatus};
    use chrono::Utc;
    use uuid::Uuid;

    fn item(text: &str, horizon: Option<Horizon>) -> Item {
        Item {
            id: Uuid::new_v4(),
            source_user_id: 1,
            source_chat_id: 1,
            source_message_id: None,
            kind: ItemKind::Task,
            horizon_tag: horizon,
            text: text.to_string(),
            transcript: None,
            summary: None,
            title: None,
            status: ItemStatus::Open,
            created_at: Utc::now(),
            closed_at: None,
            raw_payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn commands_match_first_token_case_sensitively() {
        assert_eq!(parse_command("/start"), Some(Command::Start));
        assert_eq!(parse_command("  /help please"), Some(Command::Help));
        assert_eq!(parse_command("/done@hx2000_bot"), Some(Command::Done));
        assert_eq!(parse_command("/DONE"), None);
        assert_eq!(parse_command("/done@"), None);
        assert_eq!(parse_command("/donething"), None);
        assert_eq!(parse_command("сделать /done"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn close_callback_round_trips_and_rejects_garbage() {
        let id = Uuid::new_v4();
        assert_eq!(parse_close_callback(&close_callback_data(id)), Some(id));
        assert_eq!(parse_close_callback("done:not-a-uuid"), None);
        assert_eq!(parse_close_callback(&id.to_string()), None);
        assert_eq!(parse_close_callback("open:00000000-0000-0000-0000-000000000000"), None);
    }

    #[test]
    fn empty_list_renders_fixed_text() {
        let message = render_open_tasks(&[]);
        assert_eq!(message.text, NO_OPEN_TASKS_TEXT);
        assert!(message.buttons.is_empty());
    }

    #[test]
    fn list_numbers_items_and_adds_one_button_each() {
        let items = vec![item("купить хлеб", Some(Horizon::Week)), item("отчёт", None)];
        let message = render_open_tasks(&items);
        assert_eq!(message.text, "Открытые задачи:\n1. купить хлеб #неделя\n2. отчёт");
        assert_eq!(message.buttons.len(), 2);
        assert_eq!(message.buttons[1][0].text, "✅ Закрыть 2");
        assert_eq!(
            message.buttons[0][0].callback_data,
            format!("done:{}", items[0].id)
        );
    }

    #[test]
    fn voice_ack_includes_text_and_summary() {
        let mut captured = item(&"а".repeat(1500), Some(Horizon::Month));
        captured.summary = Some("Коротко".to_string());
        let ack = render_capture_ack(&captured, true);
        assert!(ack.starts_with("Сохранено: задача #месяц\n\n"));
        assert!(ack.ends_with("\n\nКратко: Коротко"));
        assert!(ack.contains(&"а".repeat(1000)));
        assert!(!ack.contains(&"а".repeat(1001)));

        let plain = render_capture_ack(&item("x", None), false);
        assert_eq!(plain, "Сохранено: задача без горизонта");
    }
}
