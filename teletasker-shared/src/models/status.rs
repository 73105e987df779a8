use serde::{Deserialize, Serialize};

use super::ChatId;

/// Backend extraction job state for one chat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Idle,
    Processing,
    Completed,
    Error,
}

impl ProcessingState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// `completed` and `error` end a poll chain.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Response of `GET /tasks/chat/{chat_id}/processing-status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatProcessingStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
    pub status: ProcessingState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_messages: Option<u64>,
    /// Older backends report progress under this name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_count: Option<u64>,
}

impl ChatProcessingStatus {
    #[must_use]
    pub fn new(chat_id: ChatId, status: ProcessingState) -> Self {
        Self {
            chat_id: Some(chat_id),
            status,
            error_message: None,
            processed_messages: None,
            message_count: None,
        }
    }

    #[must_use]
    pub fn processed_messages(&self) -> u64 {
        self.processed_messages
            .or(self.message_count)
            .unwrap_or_default()
    }

    pub fn set_processed_messages(&mut self, count: u64) {
        self.processed_messages = Some(count);
    }

    /// The backend's error message, or a generic fallback.
    #[must_use]
    pub fn error_text(&self) -> String {
        self.error_message
            .as_deref()
            .map(str::trim)
            .filter(|message| !message.is_empty())
            .unwrap_or("Unknown error during chat processing")
            .to_string()
    }
}
