use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::ChatId;

/// Display string used when a backend date is missing or unparseable.
pub const UNKNOWN_TIME: &str = "Unknown time";

const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M";
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Completed,
}

impl TaskStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }

    #[must_use]
    pub const fn from_completed(completed: bool) -> Self {
        if completed {
            Self::Completed
        } else {
            Self::Pending
        }
    }
}

/// A unit of actionable content extracted from a chat's message history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub chat_id: ChatId,
    pub text: String,
    /// Priority label reported by the extractor.
    pub source: String,
    /// Display form of the extraction time.
    pub time: String,
    /// Display form of the source message date.
    pub message_date: String,
    pub status: TaskStatus,
    /// Extractor reasoning.
    pub extracted_from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_raw: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_date_raw: Option<DateTime<Utc>>,
}

impl Task {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Date used for chronological ordering: the message date, falling back
    /// to the extraction time.
    #[must_use]
    pub fn sort_date(&self) -> Option<DateTime<Utc>> {
        self.message_date_raw.or(self.created_at_raw)
    }
}

/// Task record as returned by `GET /tasks/chat/{chat_id}/tasks`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawTask {
    #[serde(default, deserialize_with = "flexible_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<ChatId>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub message_date: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl RawTask {
    /// Maps the backend record onto [`Task`], filling in defaults for
    /// anything the extractor left out.
    #[must_use]
    pub fn into_task(self, requested_chat: &ChatId) -> Task {
        let created_at_raw = self.created_at.as_deref().and_then(parse_backend_date);
        let message_date_raw = self.message_date.as_deref().and_then(parse_backend_date);

        Task {
            id: self
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            chat_id: self.chat_id.unwrap_or_else(|| requested_chat.clone()),
            text: self
                .description
                .filter(|text| !text.trim().is_empty())
                .unwrap_or_else(|| "No description".to_string()),
            source: self
                .priority
                .filter(|priority| !priority.trim().is_empty())
                .unwrap_or_else(|| "medium".to_string()),
            time: display_time(created_at_raw),
            message_date: display_time(message_date_raw),
            status: TaskStatus::from_completed(self.completed.unwrap_or(false)),
            extracted_from: self.reasoning.unwrap_or_default(),
            created_at_raw,
            message_date_raw,
        }
    }
}

/// Task list payload, either a bare array or wrapped in a `tasks`/`data`
/// envelope. Any other shape is a decode error.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum TaskListResponse {
    Bare(Vec<RawTask>),
    Tasks { tasks: Vec<RawTask> },
    Data { data: Vec<RawTask> },
}

impl TaskListResponse {
    #[must_use]
    pub fn into_tasks(self) -> Vec<RawTask> {
        match self {
            Self::Bare(tasks) | Self::Tasks { tasks } | Self::Data { data: tasks } => tasks,
        }
    }
}

/// Parses the backend's timestamps: RFC 3339, or naive ISO-8601 taken as UTC.
#[must_use]
pub fn parse_backend_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

fn display_time(date: Option<DateTime<Utc>>) -> String {
    date.map_or_else(
        || UNKNOWN_TIME.to_string(),
        |date| date.format(DISPLAY_FORMAT).to_string(),
    )
}

fn flexible_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Int(i64),
        Str(String),
    }

    Ok(Option::<IdRepr>::deserialize(deserializer)?.map(|repr| match repr {
        IdRepr::Int(value) => value.to_string(),
        IdRepr::Str(value) => value,
    }))
}
