use std::{fmt, str::FromStr};

use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, Visitor},
};
use thiserror::Error;

/// Identifier of a Telegram chat as understood by the backend.
///
/// The backend sends numeric identifiers while cache keys and URLs use the
/// string form, so both representations are accepted on input. Numeric ids
/// serialize back as JSON numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(String);

/// Returned when a chat identifier cannot be used in a request path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseChatIdError {
    #[error("chat id must not be empty")]
    Empty,
    #[error("chat id {0:?} contains characters that are not allowed")]
    InvalidCharacters(String),
    #[error("chat id {0:?} is reserved for the aggregate view")]
    Reserved(String),
}

/// Name of the aggregate "all chats" view; never a chat id.
pub const AGGREGATE_NAME: &str = "all";

impl ChatId {
    /// Wraps an identifier without validation. User input goes through
    /// [`FromStr`] instead.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric form, when the identifier is an integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ChatId {
    type Err = ParseChatIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ParseChatIdError::Empty);
        }
        if trimmed
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '%'))
        {
            return Err(ParseChatIdError::InvalidCharacters(trimmed.to_string()));
        }
        if trimmed == AGGREGATE_NAME {
            return Err(ParseChatIdError::Reserved(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<i64> for ChatId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl Serialize for ChatId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_i64() {
            Some(numeric) => serializer.serialize_i64(numeric),
            None => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for ChatId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ChatIdVisitor;

        impl Visitor<'_> for ChatIdVisitor {
            type Value = ChatId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a chat id as a string or an integer")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<ChatId, E> {
                if value.is_empty() {
                    return Err(E::custom("chat id must not be empty"));
                }
                if value == AGGREGATE_NAME {
                    return Err(E::custom("chat id \"all\" is reserved"));
                }
                Ok(ChatId(value.to_string()))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<ChatId, E> {
                Ok(ChatId(value.to_string()))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<ChatId, E> {
                Ok(ChatId(value.to_string()))
            }
        }

        deserializer.deserialize_any(ChatIdVisitor)
    }
}

/// Processing policy applied to a monitored chat.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    /// Extract tasks only, never reply.
    #[default]
    Observe,
    /// Extract tasks and send replies.
    Automate,
}

impl ChatMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Observe => "observe",
            Self::Automate => "automate",
        }
    }
}

impl TryFrom<&str> for ChatMode {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "observe" => Ok(Self::Observe),
            "automate" => Ok(Self::Automate),
            _ => Err("invalid chat mode"),
        }
    }
}

/// A monitored conversation as shown on the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub name: String,
    pub avatar: String,
    pub mode: ChatMode,
}

/// Monitored chat record returned by `GET /tasks/monitored-chats`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitoredChatRecord {
    pub chat_id: ChatId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ChatMode>,
}

impl From<MonitoredChatRecord> for Chat {
    fn from(record: MonitoredChatRecord) -> Self {
        let name = record
            .chat_name
            .or(record.title)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("Chat {}", record.chat_id));
        let avatar = match record.chat_type.as_deref() {
            Some("user" | "private") => "👤",
            _ => "👥",
        };
        Self {
            id: record.chat_id,
            name,
            avatar: avatar.to_string(),
            mode: record.mode.unwrap_or_default(),
        }
    }
}

/// Body of the bulk `POST /tasks/monitored-chats` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddMonitoredChatsRequest {
    pub chat_ids: Vec<ChatId>,
}
