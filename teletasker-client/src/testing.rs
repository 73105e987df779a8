//! Scripted [`TaskApi`] and fixtures for unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use reqwest::StatusCode;
use shared::models::{
    AvailableChat, ChatId, ChatMode, ChatProcessingStatus, MonitoredChatRecord, ProcessingState,
    RawTask, Task, TaskStatus, TelegramAuthStatus, UNKNOWN_TIME,
};

use crate::{
    api::TaskApi,
    error::{SyncError, SyncResult},
};

pub fn task(id: &str, chat_id: &str) -> Task {
    Task {
        id: id.to_string(),
        chat_id: ChatId::new(chat_id),
        text: format!("task {id}"),
        source: "medium".to_string(),
        time: UNKNOWN_TIME.to_string(),
        message_date: UNKNOWN_TIME.to_string(),
        status: TaskStatus::Pending,
        extracted_from: String::new(),
        created_at_raw: None,
        message_date_raw: None,
    }
}

pub fn raw(id: &str) -> RawTask {
    RawTask {
        id: Some(id.to_string()),
        description: Some(format!("task {id}")),
        ..RawTask::default()
    }
}

fn unavailable(endpoint: String) -> SyncError {
    SyncError::Status {
        endpoint,
        status: StatusCode::SERVICE_UNAVAILABLE,
        detail: Some("backend unavailable".to_string()),
    }
}

type Scripted<T> = VecDeque<Option<T>>;

#[derive(Debug, Default)]
struct FakeState {
    chats: Vec<MonitoredChatRecord>,
    statuses: HashMap<ChatId, Scripted<ChatProcessingStatus>>,
    tasks: HashMap<ChatId, Scripted<Vec<RawTask>>>,
    status_delays: HashMap<ChatId, Duration>,
    status_calls: HashMap<ChatId, usize>,
    task_calls: HashMap<ChatId, usize>,
    added: Vec<ChatId>,
    removed: Vec<ChatId>,
    completions: Vec<(String, bool)>,
}

impl FakeState {
    fn monitor(&mut self, chat_id: &ChatId) {
        self.added.push(chat_id.clone());
        if !self.chats.iter().any(|chat| &chat.chat_id == chat_id) {
            self.chats.push(MonitoredChatRecord {
                chat_id: chat_id.clone(),
                chat_name: None,
                title: None,
                chat_type: None,
                mode: None,
            });
        }
    }
}

/// Answers are consumed in order; the last scripted answer repeats.
/// `None` entries answer with a `503`.
#[derive(Debug, Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
}

fn next<T: Clone>(queue: Option<&mut Scripted<T>>) -> Option<Option<T>> {
    let queue = queue?;
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chats(self, chats: &[(&str, ChatMode)]) -> Self {
        self.state.lock().unwrap().chats = chats
            .iter()
            .map(|(id, mode)| MonitoredChatRecord {
                chat_id: ChatId::new(*id),
                chat_name: Some(format!("Chat {id}")),
                title: None,
                chat_type: None,
                mode: Some(*mode),
            })
            .collect();
        self
    }

    pub fn push_status(&self, chat_id: &str, state: ProcessingState) {
        self.push_status_payload(chat_id, ChatProcessingStatus::new(ChatId::new(chat_id), state));
    }

    pub fn push_status_payload(&self, chat_id: &str, status: ChatProcessingStatus) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .entry(ChatId::new(chat_id))
            .or_default()
            .push_back(Some(status));
    }

    pub fn push_status_failure(&self, chat_id: &str) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .entry(ChatId::new(chat_id))
            .or_default()
            .push_back(None);
    }

    pub fn push_tasks(&self, chat_id: &str, ids: &[&str]) {
        let tasks = ids.iter().map(|id| raw(id)).collect();
        self.state
            .lock()
            .unwrap()
            .tasks
            .entry(ChatId::new(chat_id))
            .or_default()
            .push_back(Some(tasks));
    }

    pub fn push_task_failure(&self, chat_id: &str) {
        self.state
            .lock()
            .unwrap()
            .tasks
            .entry(ChatId::new(chat_id))
            .or_default()
            .push_back(None);
    }

    /// Delays every status answer for `chat_id`.
    pub fn delay_status(&self, chat_id: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .status_delays
            .insert(ChatId::new(chat_id), delay);
    }

    pub fn status_calls(&self, chat_id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.status_calls.get(&ChatId::new(chat_id)).copied().unwrap_or(0)
    }

    pub fn task_calls(&self, chat_id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.task_calls.get(&ChatId::new(chat_id)).copied().unwrap_or(0)
    }

    pub fn added(&self) -> Vec<ChatId> {
        self.state.lock().unwrap().added.clone()
    }

    pub fn removed(&self) -> Vec<ChatId> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn completions(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().completions.clone()
    }
}

#[async_trait]
impl TaskApi for FakeApi {
    async fn monitored_chats(&self) -> SyncResult<Vec<MonitoredChatRecord>> {
        Ok(self.state.lock().unwrap().chats.clone())
    }

    async fn add_monitored_chat(&self, chat_id: &ChatId) -> SyncResult<()> {
        self.state.lock().unwrap().monitor(chat_id);
        Ok(())
    }

    async fn add_monitored_chats(&self, chat_ids: &[ChatId]) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        for chat_id in chat_ids {
            state.monitor(chat_id);
        }
        Ok(())
    }

    async fn remove_monitored_chat(&self, chat_id: &ChatId) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        state.chats.retain(|chat| &chat.chat_id != chat_id);
        state.removed.push(chat_id.clone());
        Ok(())
    }

    async fn processing_status(&self, chat_id: &ChatId) -> SyncResult<ChatProcessingStatus> {
        let (delay, answer) = {
            let mut state = self.state.lock().unwrap();
            *state.status_calls.entry(chat_id.clone()).or_default() += 1;
            let delay = state.status_delays.get(chat_id).copied();
            (delay, next(state.statuses.get_mut(chat_id)))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match answer {
            Some(Some(status)) => Ok(status),
            Some(None) => Err(unavailable(format!("tasks/chat/{chat_id}/processing-status"))),
            None => Ok(ChatProcessingStatus::new(chat_id.clone(), ProcessingState::Idle)),
        }
    }

    async fn chat_tasks(&self, chat_id: &ChatId) -> SyncResult<Vec<RawTask>> {
        let answer = {
            let mut state = self.state.lock().unwrap();
            *state.task_calls.entry(chat_id.clone()).or_default() += 1;
            next(state.tasks.get_mut(chat_id))
        };
        match answer {
            Some(Some(tasks)) => Ok(tasks),
            Some(None) => Err(unavailable(format!("tasks/chat/{chat_id}/tasks"))),
            None => Ok(Vec::new()),
        }
    }

    async fn set_task_completed(&self, task_id: &str, completed: bool) -> SyncResult<()> {
        self.state
            .lock()
            .unwrap()
            .completions
            .push((task_id.to_string(), completed));
        Ok(())
    }

    /// Every monitored chat, as the account sees it.
    async fn telegram_chats(&self) -> SyncResult<Vec<AvailableChat>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .chats
            .iter()
            .map(|chat| AvailableChat {
                id: chat.chat_id.clone(),
                title: chat.chat_name.clone().unwrap_or_default(),
                chat_type: chat.chat_type.clone(),
                username: None,
                unread_count: 0,
                last_message: None,
            })
            .collect())
    }

    async fn telegram_auth_status(&self) -> SyncResult<TelegramAuthStatus> {
        Ok(TelegramAuthStatus { logged_in: true })
    }
}
