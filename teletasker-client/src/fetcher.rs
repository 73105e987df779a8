//! # Task fetcher
//!
//! The only writer of the shared task collection and of the task cache.
//! Refreshes replace a chat's tasks wholesale, so concurrent refreshes of the
//! same chat from the poller and the update stream are idempotent: the last
//! response wins.

use std::sync::{Arc, PoisonError, RwLockReadGuard, RwLockWriteGuard};

use futures_util::future::join_all;
use shared::models::{ChatId, Task, TaskStatus};
use tracing::{debug, info, instrument, warn};

use crate::{
    api::TaskApi,
    cache::{CacheScope, TaskCache},
    collection::{SharedTasks, TaskCollection},
    error::{SyncError, SyncResult},
    events::{EventSender, SyncEvent},
};

#[derive(Clone, Debug)]
pub struct TaskFetcher {
    api: Arc<dyn TaskApi>,
    tasks: SharedTasks,
    cache: TaskCache,
    events: EventSender,
}

impl TaskFetcher {
    #[must_use]
    pub fn new(api: Arc<dyn TaskApi>, cache: TaskCache, events: EventSender) -> Self {
        Self {
            api,
            tasks: TaskCollection::shared(),
            cache,
            events,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &TaskCache {
        &self.cache
    }

    #[must_use]
    pub fn api(&self) -> &Arc<dyn TaskApi> {
        &self.api
    }

    /// Tasks currently resident for `scope`.
    #[must_use]
    pub fn snapshot(&self, scope: &CacheScope) -> Vec<Task> {
        let tasks = self.read();
        match scope {
            CacheScope::All => tasks.all(),
            CacheScope::Chat(chat_id) => tasks.for_chat(chat_id),
        }
    }

    #[must_use]
    pub fn has_tasks(&self, chat_id: &ChatId) -> bool {
        self.read().contains_chat(chat_id)
    }

    /// Fetches one chat's tasks and replaces them in the collection.
    ///
    /// On failure a previously cached list keeps being served. Without one,
    /// the chat's resident tasks are cleared and the error is returned.
    ///
    /// # Errors
    /// Returns the API error when the fetch fails.
    #[instrument(skip(self), fields(chat_id = %chat_id))]
    pub async fn fetch_tasks_for_chat(&self, chat_id: &ChatId) -> SyncResult<Vec<Task>> {
        self.refresh_chat(chat_id, None).await
    }

    /// Fetch started by poll chain `generation`. When `is_current` reports
    /// the chain superseded by the time the answer arrives, the answer is
    /// dropped and [`SyncError::Cancelled`] returned.
    #[instrument(skip(self, is_current), fields(chat_id = %chat_id))]
    pub(crate) async fn fetch_for_chain(
        &self,
        chat_id: &ChatId,
        generation: u64,
        is_current: &(dyn Fn() -> bool + Send + Sync),
    ) -> SyncResult<Vec<Task>> {
        self.refresh_chat(chat_id, Some((generation, is_current)))
            .await
    }

    async fn refresh_chat(
        &self,
        chat_id: &ChatId,
        chain: Option<(u64, &(dyn Fn() -> bool + Send + Sync))>,
    ) -> SyncResult<Vec<Task>> {
        let scope = CacheScope::Chat(chat_id.clone());
        let cached = self.cache.get(&scope);

        let result = self.api.chat_tasks(chat_id).await;
        let generation = chain.map(|(generation, _)| generation);
        if let Some((generation, is_current)) = chain
            && !is_current()
        {
            debug!(generation, "dropping tasks fetched for a superseded poll chain");
            return Err(SyncError::Cancelled);
        }

        match result {
            Ok(records) => {
                let tasks: Vec<Task> = records
                    .into_iter()
                    .map(|record| record.into_task(chat_id))
                    .collect();
                self.write().replace_chat(chat_id, tasks.clone());
                self.cache.set(&scope, &tasks);
                // The aggregate entry no longer matches this chat.
                self.cache.remove(&CacheScope::All);

                info!(count = tasks.len(), "tasks refreshed");
                self.emit(SyncEvent::TasksUpdated {
                    chat_id: Some(chat_id.clone()),
                    count: tasks.len(),
                    generation,
                });
                Ok(tasks)
            }
            Err(err) => {
                let served_stale = cached.is_some();
                match cached {
                    Some(cached) => {
                        let mut collection = self.write();
                        if !collection.contains_chat(chat_id) {
                            collection.replace_chat(chat_id, cached);
                        }
                        warn!(error = %err, "task fetch failed, serving cached tasks");
                    }
                    None => {
                        let cleared = self.write().remove_chat(chat_id);
                        warn!(error = %err, cleared, "task fetch failed with nothing cached");
                    }
                }
                self.emit(SyncEvent::FetchFailed {
                    chat_id: Some(chat_id.clone()),
                    message: err.to_string(),
                    served_stale,
                    generation,
                });
                Err(err)
            }
        }
    }

    /// Fetches every monitored chat's tasks for the aggregate view.
    ///
    /// A chat whose task query fails contributes its cached tasks, if any.
    ///
    /// # Errors
    /// Returns the API error when the monitored chat list cannot be fetched.
    #[instrument(skip(self))]
    pub async fn fetch_all_tasks(&self) -> SyncResult<Vec<Task>> {
        let chats = match self.api.monitored_chats().await {
            Ok(chats) => chats,
            Err(err) => {
                let served_stale = match self.cache.get(&CacheScope::All) {
                    Some(cached) => {
                        self.write().replace_all(cached);
                        true
                    }
                    None => {
                        self.write().replace_all(Vec::new());
                        false
                    }
                };
                warn!(error = %err, served_stale, "monitored chat query failed");
                self.emit(SyncEvent::FetchFailed {
                    chat_id: None,
                    message: err.to_string(),
                    served_stale,
                    generation: None,
                });
                return Err(err);
            }
        };

        let fetches = chats.iter().map(|chat| async move {
            let chat_id = &chat.chat_id;
            match self.api.chat_tasks(chat_id).await {
                Ok(records) => {
                    let tasks: Vec<Task> = records
                        .into_iter()
                        .map(|record| record.into_task(chat_id))
                        .collect();
                    self.cache.set(&CacheScope::Chat(chat_id.clone()), &tasks);
                    tasks
                }
                Err(err) => {
                    warn!(chat_id = %chat_id, error = %err, "skipping chat in aggregate view");
                    self.cache
                        .get(&CacheScope::Chat(chat_id.clone()))
                        .unwrap_or_default()
                }
            }
        });
        let tasks: Vec<Task> = join_all(fetches).await.into_iter().flatten().collect();

        self.write().replace_all(tasks.clone());
        self.cache.set(&CacheScope::All, &tasks);
        info!(chats = chats.len(), count = tasks.len(), "aggregate tasks refreshed");
        self.emit(SyncEvent::TasksUpdated {
            chat_id: None,
            count: tasks.len(),
            generation: None,
        });
        Ok(tasks)
    }

    /// Copies a fresh cache entry into the collection. Returns the number of
    /// tasks shown, or `None` when nothing fresh was cached.
    pub fn hydrate_from_cache(&self, scope: &CacheScope) -> Option<usize> {
        let cached = self.cache.get(scope)?;
        let count = cached.len();
        match scope {
            CacheScope::All => self.write().replace_all(cached),
            CacheScope::Chat(chat_id) => self.write().replace_chat(chat_id, cached),
        }
        debug!(key = %scope.key(), count, "hydrated from cache");
        Some(count)
    }

    /// Drops everything known about a chat that is no longer monitored.
    pub fn forget_chat(&self, chat_id: &ChatId) {
        let removed = self.write().remove_chat(chat_id);
        self.cache.invalidate(Some(chat_id));
        self.cache.remove(&CacheScope::All);
        debug!(chat_id = %chat_id, removed, "forgot chat tasks");
    }

    /// Updates a task's completion flag on the backend, then locally.
    ///
    /// # Errors
    /// Returns the API error; local state is untouched in that case.
    pub async fn set_task_completed(&self, task_id: &str, completed: bool) -> SyncResult<()> {
        self.api.set_task_completed(task_id, completed).await?;

        let status = TaskStatus::from_completed(completed);
        let chat_id = self.write().set_task_status(task_id, status);
        self.patch_cached_status(&CacheScope::All, task_id, status);
        if let Some(chat_id) = chat_id {
            self.patch_cached_status(&CacheScope::Chat(chat_id.clone()), task_id, status);
            let count = self.read().for_chat(&chat_id).len();
            self.emit(SyncEvent::TasksUpdated {
                chat_id: Some(chat_id),
                count,
                generation: None,
            });
        }
        info!(task_id, completed, "task completion updated");
        Ok(())
    }

    fn patch_cached_status(&self, scope: &CacheScope, task_id: &str, status: TaskStatus) {
        if let Some(mut tasks) = self.cache.get(scope)
            && let Some(task) = tasks.iter_mut().find(|task| task.id == task_id)
        {
            task.status = status;
            self.cache.set(scope, &tasks);
        }
    }

    fn emit(&self, event: SyncEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TaskCollection> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TaskCollection> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }
}
