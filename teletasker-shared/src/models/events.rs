use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChatId, ProcessingState};

/// Payload of an `update` event on the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateEvent {
    NewTask {
        chat_id: ChatId,
        #[serde(default)]
        data: Value,
    },
    NewTasks {
        chat_id: ChatId,
        #[serde(default)]
        data: Value,
    },
    PollingUpdate {
        chat_id: ChatId,
        #[serde(default)]
        data: PollingUpdateData,
    },
    /// Event types this client does not act upon.
    #[serde(other)]
    Unknown,
}

/// Progress patch carried by `polling_update`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingUpdateData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_messages: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProcessingState>,
}

impl UpdateEvent {
    #[must_use]
    pub fn chat_id(&self) -> Option<&ChatId> {
        match self {
            Self::NewTask { chat_id, .. }
            | Self::NewTasks { chat_id, .. }
            | Self::PollingUpdate { chat_id, .. } => Some(chat_id),
            Self::Unknown => None,
        }
    }

    /// Whether the event announces tasks that require a re-fetch.
    #[must_use]
    pub const fn announces_tasks(&self) -> bool {
        matches!(self, Self::NewTask { .. } | Self::NewTasks { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_task_announcements() {
        let event: UpdateEvent =
            serde_json::from_str(r#"{"type": "new_tasks", "chat_id": 42, "data": {"count": 2}}"#)
                .unwrap();
        assert!(event.announces_tasks());
        assert_eq!(event.chat_id(), Some(&ChatId::from(42)));

        let event: UpdateEvent =
            serde_json::from_str(r#"{"type": "new_task", "chat_id": "7"}"#).unwrap();
        assert!(matches!(event, UpdateEvent::NewTask { data: Value::Null, .. }));
    }

    #[test]
    fn parses_polling_update() {
        let event: UpdateEvent = serde_json::from_str(
            r#"{"type": "polling_update", "chat_id": 3, "data": {"processed_messages": 40}}"#,
        )
        .unwrap();
        match event {
            UpdateEvent::PollingUpdate { chat_id, data } => {
                assert_eq!(chat_id, ChatId::from(3));
                assert_eq!(data.processed_messages, Some(40));
                assert_eq!(data.status, None);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn unknown_types_are_tolerated() {
        let event: UpdateEvent =
            serde_json::from_str(r#"{"type": "reply_sent", "chat_id": 1}"#).unwrap();
        assert_eq!(event, UpdateEvent::Unknown);
        assert!(event.chat_id().is_none());
        assert!(!event.announces_tasks());
    }
}
