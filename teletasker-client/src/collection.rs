//! In-memory task collection shared by every view.
//!
//! A flat list filtered by chat id at read time. Each chat has at most one
//! resident set of tasks: refreshing a chat replaces its tasks wholesale.

use std::sync::{Arc, RwLock};

use shared::models::{ChatId, Task, TaskStatus};

/// Handle to the collection. Writes go through [`crate::fetcher::TaskFetcher`].
pub type SharedTasks = Arc<RwLock<TaskCollection>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskCollection {
    tasks: Vec<Task>,
}

impl TaskCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared() -> SharedTasks {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Replaces every task of `chat_id` with `tasks`. Other chats are untouched.
    ///
    /// Tasks in `tasks` that name a different chat are re-homed to `chat_id`
    /// so the per-chat invariant holds.
    pub fn replace_chat(&mut self, chat_id: &ChatId, tasks: Vec<Task>) {
        self.tasks.retain(|task| &task.chat_id != chat_id);
        self.tasks.extend(tasks.into_iter().map(|mut task| {
            if &task.chat_id != chat_id {
                task.chat_id = chat_id.clone();
            }
            task
        }));
    }

    /// Full-collection replace, reserved for the aggregate view.
    pub fn replace_all(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
    }

    /// Drops a chat's tasks; returns how many were removed.
    pub fn remove_chat(&mut self, chat_id: &ChatId) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|task| &task.chat_id != chat_id);
        before - self.tasks.len()
    }

    #[must_use]
    pub fn for_chat(&self, chat_id: &ChatId) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|task| &task.chat_id == chat_id)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn all(&self) -> Vec<Task> {
        self.tasks.clone()
    }

    #[must_use]
    pub fn contains_chat(&self, chat_id: &ChatId) -> bool {
        self.tasks.iter().any(|task| &task.chat_id == chat_id)
    }

    #[must_use]
    pub fn find(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }

    /// Updates one task's status and returns its chat id, if the task is resident.
    pub fn set_task_status(&mut self, task_id: &str, status: TaskStatus) -> Option<ChatId> {
        self.tasks
            .iter_mut()
            .find(|task| task.id == task_id)
            .map(|task| {
                task.status = status;
                task.chat_id.clone()
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
