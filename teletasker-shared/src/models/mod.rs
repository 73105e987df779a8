//! Wire models exchanged with the task-extraction backend.

pub mod chat;
pub mod errors;
pub mod events;
pub mod status;
pub mod task;
pub mod telegram;

pub use chat::{
    AGGREGATE_NAME, AddMonitoredChatsRequest, Chat, ChatId, ChatMode, MonitoredChatRecord,
    ParseChatIdError,
};
pub use errors::ErrorResponse;
pub use events::{PollingUpdateData, UpdateEvent};
pub use status::{ChatProcessingStatus, ProcessingState};
pub use task::{RawTask, Task, TaskListResponse, TaskStatus, UNKNOWN_TIME};
pub use telegram::{AvailableChat, LastMessage, TelegramAuthStatus};
