use std::fmt::Write as _;

use anyhow::Result;
use client::api::TaskApi;
use shared::{
    config::Config,
    models::{AvailableChat, Chat, ChatId, ChatProcessingStatus, ProcessingState},
};

use super::{BackendContext, connect, dashboard};

pub async fn list(config: &Config) -> Result<()> {
    let mut dashboard = dashboard(config, connect(config)?)?;
    let chats = dashboard
        .load_chats()
        .await
        .backend_context("failed to fetch monitored chats")?;
    print!("{}", render_chats(chats));
    Ok(())
}

/// Chats the Telegram account can see, with the monitored ones marked.
pub async fn available(config: &Config) -> Result<()> {
    let api = connect(config)?;
    let chats = api
        .telegram_chats()
        .await
        .backend_context("failed to fetch Telegram chats")?;
    let monitored: Vec<ChatId> = api
        .monitored_chats()
        .await
        .backend_context("failed to fetch monitored chats")?
        .into_iter()
        .map(|record| record.chat_id)
        .collect();
    print!("{}", render_available(&chats, &monitored));
    Ok(())
}

pub async fn monitor(config: &Config, chat_ids: &[ChatId]) -> Result<()> {
    let mut dashboard = dashboard(config, connect(config)?)?;
    let added = if let [chat_id] = chat_ids {
        dashboard.add_chat(chat_id).await
    } else {
        dashboard.add_chats(chat_ids).await
    };
    added.backend_context("failed to add monitored chats")?;
    println!("Monitoring {} chat(s)", chat_ids.len());
    print!("{}", render_chats(dashboard.chats()));
    Ok(())
}

pub async fn unmonitor(config: &Config, chat_id: &ChatId) -> Result<()> {
    let mut dashboard = dashboard(config, connect(config)?)?;
    dashboard
        .load_chats()
        .await
        .backend_context("failed to fetch monitored chats")?;
    dashboard
        .remove_chat(chat_id)
        .await
        .backend_context(format!("failed to stop monitoring chat {chat_id}"))?;
    println!("Stopped monitoring chat {chat_id}");
    Ok(())
}

pub async fn status(config: &Config, chat_id: &ChatId) -> Result<()> {
    let api = connect(config)?;
    let status = api
        .processing_status(chat_id)
        .await
        .backend_context(format!("failed to fetch processing status for chat {chat_id}"))?;
    println!("{}", render_status(chat_id, &status));
    Ok(())
}

fn render_chats(chats: &[Chat]) -> String {
    if chats.is_empty() {
        return "No monitored chats. Add one with `teletasker monitor <chat-id>`.\n".to_string();
    }
    let width = chats
        .iter()
        .map(|chat| chat.id.as_str().len())
        .max()
        .unwrap_or_default();
    let mut out = String::new();
    for chat in chats {
        let _ = writeln!(
            out,
            "{} {:<width$}  {:<8}  {}",
            chat.avatar,
            chat.id.as_str(),
            chat.mode.as_str(),
            chat.name
        );
    }
    out
}

fn render_available(chats: &[AvailableChat], monitored: &[ChatId]) -> String {
    if chats.is_empty() {
        return "No Telegram chats found. Check `teletasker account`.\n".to_string();
    }
    let width = chats
        .iter()
        .map(|chat| chat.id.as_str().len())
        .max()
        .unwrap_or_default();
    let mut out = String::new();
    for chat in chats {
        let mark = if monitored.contains(&chat.id) { '*' } else { ' ' };
        let _ = write!(
            out,
            "{mark} {} {:<width$}  {}",
            chat.avatar(),
            chat.id.as_str(),
            chat.title
        );
        if chat.unread_count > 0 {
            let _ = write!(out, " ({} unread)", chat.unread_count);
        }
        match chat.last_message_time() {
            Some(time) => {
                let _ = write!(out, "  [{time}] {}", chat.preview());
            }
            None => {
                let _ = write!(out, "  {}", chat.preview());
            }
        }
        out.push('\n');
    }
    out
}

pub fn render_status(chat_id: &ChatId, status: &ChatProcessingStatus) -> String {
    let mut line = format!(
        "chat {chat_id}: {} ({} messages processed)",
        status.status.as_str(),
        status.processed_messages()
    );
    if status.status == ProcessingState::Error {
        let _ = write!(line, ": {}", status.error_text());
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{ChatMode, MonitoredChatRecord};

    #[test]
    fn chats_are_aligned_by_id() {
        let mut ops = Chat::from(MonitoredChatRecord {
            chat_id: ChatId::from(-1001),
            chat_name: Some("Ops".into()),
            title: None,
            chat_type: Some("supergroup".into()),
            mode: None,
        });
        ops.mode = ChatMode::Automate;
        let alice = Chat::from(MonitoredChatRecord {
            chat_id: ChatId::from(7),
            chat_name: None,
            title: Some("Alice".into()),
            chat_type: Some("private".into()),
            mode: None,
        });

        assert_eq!(
            render_chats(&[ops, alice]),
            "👥 -1001  automate  Ops\n👤 7      observe   Alice\n"
        );
    }

    #[test]
    fn empty_chat_list_suggests_monitoring() {
        assert!(render_chats(&[]).contains("teletasker monitor"));
    }

    #[test]
    fn available_chats_mark_the_monitored_ones() {
        let chats: Vec<AvailableChat> = serde_json::from_value(serde_json::json!([
            {
                "id": -1001,
                "title": "Ops",
                "type": "supergroup",
                "unread_count": 2,
                "last_message": {"text": "ship it", "date": "2024-05-01T09:15:00Z"}
            },
            {"id": 7, "title": "Alice", "type": "user"}
        ]))
        .unwrap();

        assert_eq!(
            render_available(&chats, &[ChatId::from(7)]),
            "  👥 -1001  Ops (2 unread)  [09:15] ship it\n* 👤 7      Alice  No messages\n"
        );
        assert!(render_available(&[], &[]).contains("teletasker account"));
    }

    #[test]
    fn error_status_carries_the_message() {
        let chat = ChatId::from(3);
        let mut status = ChatProcessingStatus::new(chat.clone(), ProcessingState::Error);
        status.error_message = Some("LLM quota exceeded".into());
        status.set_processed_messages(12);

        assert_eq!(
            render_status(&chat, &status),
            "chat 3: error (12 messages processed): LLM quota exceeded"
        );
    }
}
