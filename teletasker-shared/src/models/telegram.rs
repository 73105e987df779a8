//! The user's Telegram account as seen through the backend.

use serde::{Deserialize, Serialize};

use super::{ChatId, task::parse_backend_date};

/// Whether the backend holds a logged-in Telegram session
/// (`GET /telethon/auth/status`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TelegramAuthStatus {
    #[serde(default)]
    pub logged_in: bool,
}

/// A chat the account can see, monitored or not (`GET /telethon/chats`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailableChat {
    pub id: ChatId,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub chat_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub unread_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub is_outgoing: bool,
}

impl AvailableChat {
    #[must_use]
    pub fn avatar(&self) -> &'static str {
        if self.chat_type.as_deref() == Some("user") {
            "👤"
        } else {
            "👥"
        }
    }

    /// Text of the last message, or `"No messages"`.
    #[must_use]
    pub fn preview(&self) -> &str {
        self.last_message
            .as_ref()
            .and_then(|message| message.text.as_deref())
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .unwrap_or("No messages")
    }

    /// `HH:MM` of the last message, when it carries a readable date.
    #[must_use]
    pub fn last_message_time(&self) -> Option<String> {
        let date = self.last_message.as_ref()?.date.as_deref()?;
        parse_backend_date(date).map(|date| date.format("%H:%M").to_string())
    }
}
