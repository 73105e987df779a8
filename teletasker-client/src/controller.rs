//! # Dashboard controller
//!
//! Owns the selected chat and the view state, and applies the events raised
//! by the poller, the fetcher and the update stream. All task writes go
//! through [`TaskFetcher`]; the controller only decides when to trigger them.

use std::{collections::HashMap, sync::Arc};

use shared::{
    config::SyncConfig,
    models::{Chat, ChatId, ChatMode, ChatProcessingStatus, ProcessingState, Task, UpdateEvent},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    api::TaskApi,
    cache::{CacheScope, TaskCache},
    error::SyncResult,
    events::{self, EventReceiver, EventSender, StreamState, SyncEvent},
    fetcher::TaskFetcher,
    poller::StatusPoller,
    view::{self, SortOrder, TaskFilter},
};

/// What the dashboard shows around the task list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub loading: bool,
    pub processing: bool,
    /// Failure shown with a retry control.
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct Dashboard {
    api: Arc<dyn TaskApi>,
    fetcher: TaskFetcher,
    poller: StatusPoller,
    sender: EventSender,
    events: EventReceiver,
    chats: Vec<Chat>,
    selected: Option<ChatId>,
    statuses: HashMap<ChatId, ChatProcessingStatus>,
    view: ViewState,
    stream_state: StreamState,
}

impl Dashboard {
    #[must_use]
    pub fn new(api: Arc<dyn TaskApi>, cache: TaskCache, config: &SyncConfig) -> Self {
        let (sender, events) = events::channel();
        let fetcher = TaskFetcher::new(Arc::clone(&api), cache, sender.clone());
        let poller = StatusPoller::new(fetcher.clone(), sender.clone(), config);
        Self {
            api,
            fetcher,
            poller,
            sender,
            events,
            chats: Vec::new(),
            selected: None,
            statuses: HashMap::new(),
            view: ViewState::default(),
            stream_state: StreamState::Closed,
        }
    }

    /// Sender for an [`crate::stream::UpdateStream`] feeding this dashboard.
    #[must_use]
    pub fn event_sender(&self) -> EventSender {
        self.sender.clone()
    }

    #[must_use]
    pub fn fetcher(&self) -> &TaskFetcher {
        &self.fetcher
    }

    #[must_use]
    pub fn poller(&self) -> &StatusPoller {
        &self.poller
    }

    #[must_use]
    pub fn chats(&self) -> &[Chat] {
        &self.chats
    }

    #[must_use]
    pub fn chat(&self, chat_id: &ChatId) -> Option<&Chat> {
        self.chats.iter().find(|chat| &chat.id == chat_id)
    }

    /// `None` is the aggregate "all chats" view.
    #[must_use]
    pub fn selected(&self) -> Option<&ChatId> {
        self.selected.as_ref()
    }

    #[must_use]
    pub fn view(&self) -> &ViewState {
        &self.view
    }

    #[must_use]
    pub fn status(&self, chat_id: &ChatId) -> Option<&ChatProcessingStatus> {
        self.statuses.get(chat_id)
    }

    #[must_use]
    pub fn stream_state(&self) -> StreamState {
        self.stream_state
    }

    /// Whether the current selection has nothing left in flight.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.view.loading
            && self
                .selected
                .as_ref()
                .is_none_or(|chat_id| !self.poller.is_active(chat_id))
    }

    /// Reloads the monitored chats. Locally assigned modes survive the reload.
    ///
    /// # Errors
    /// Returns the API error.
    pub async fn load_chats(&mut self) -> SyncResult<&[Chat]> {
        let records = self.api.monitored_chats().await?;
        let previous: HashMap<ChatId, ChatMode> = self
            .chats
            .iter()
            .map(|chat| (chat.id.clone(), chat.mode))
            .collect();
        self.chats = records
            .into_iter()
            .map(|record| {
                let explicit = record.mode.is_some();
                let mut chat = Chat::from(record);
                if !explicit && let Some(mode) = previous.get(&chat.id) {
                    chat.mode = *mode;
                }
                chat
            })
            .collect();
        debug!(count = self.chats.len(), "monitored chats loaded");
        Ok(&self.chats)
    }

    /// # Errors
    /// Returns the API error.
    pub async fn add_chat(&mut self, chat_id: &ChatId) -> SyncResult<()> {
        self.api.add_monitored_chat(chat_id).await?;
        info!(chat_id = %chat_id, "monitoring chat");
        self.load_chats().await?;
        Ok(())
    }

    /// # Errors
    /// Returns the API error.
    pub async fn add_chats(&mut self, chat_ids: &[ChatId]) -> SyncResult<()> {
        if chat_ids.is_empty() {
            return Ok(());
        }
        self.api.add_monitored_chats(chat_ids).await?;
        info!(count = chat_ids.len(), "monitoring chats");
        self.load_chats().await?;
        Ok(())
    }

    /// Stops monitoring a chat and drops its polling, tasks and cache.
    ///
    /// # Errors
    /// Returns the API error; local state is untouched in that case.
    pub async fn remove_chat(&mut self, chat_id: &ChatId) -> SyncResult<()> {
        self.api.remove_monitored_chat(chat_id).await?;
        self.poller.stop(chat_id);
        self.fetcher.forget_chat(chat_id);
        self.chats.retain(|chat| &chat.id != chat_id);
        self.statuses.remove(chat_id);
        info!(chat_id = %chat_id, "stopped monitoring chat");
        if self.selected.as_ref() == Some(chat_id) {
            self.select_chat(None).await;
        }
        Ok(())
    }

    /// Reassigns a chat's processing policy. Returns `false` for unknown chats.
    pub fn set_mode(&mut self, chat_id: &ChatId, mode: ChatMode) -> bool {
        match self.chats.iter_mut().find(|chat| &chat.id == chat_id) {
            Some(chat) => {
                chat.mode = mode;
                debug!(chat_id = %chat_id, mode = mode.as_str(), "chat mode changed");
                true
            }
            None => false,
        }
    }

    /// Changes the selection.
    ///
    /// Cached tasks are shown immediately. An observe-mode chat without a
    /// fresh cache starts polling; an automate-mode chat is fetched directly.
    /// `None` shows every chat, from cache or from a full fetch.
    pub async fn select_chat(&mut self, chat_id: Option<ChatId>) {
        if let Some(previous) = self.selected.take()
            && chat_id.as_ref() != Some(&previous)
        {
            self.poller.stop(&previous);
        }
        self.selected = chat_id.clone();
        self.view = ViewState::default();

        let Some(chat_id) = chat_id else {
            self.load_aggregate().await;
            return;
        };

        let scope = CacheScope::Chat(chat_id.clone());
        let hydrated = self.fetcher.hydrate_from_cache(&scope).is_some();
        let mode = self.chat(&chat_id).map_or(ChatMode::Observe, |chat| chat.mode);
        info!(chat_id = %chat_id, hydrated, mode = mode.as_str(), "chat selected");
        if hydrated {
            return;
        }

        match mode {
            ChatMode::Observe => {
                if self.poller.start(&chat_id) || self.poller.is_active(&chat_id) {
                    self.view.loading = true;
                }
            }
            ChatMode::Automate => {
                self.view.loading = true;
                if let Err(err) = self.fetcher.fetch_tasks_for_chat(&chat_id).await {
                    self.fail(err.to_string());
                } else {
                    self.view.loading = false;
                }
            }
        }
    }

    async fn load_aggregate(&mut self) {
        if self.fetcher.hydrate_from_cache(&CacheScope::All).is_some() {
            return;
        }
        self.view.loading = true;
        match self.fetcher.fetch_all_tasks().await {
            Ok(_) => self.view.loading = false,
            Err(err) => self.fail(err.to_string()),
        }
    }

    /// Manual re-trigger after an error.
    pub async fn retry(&mut self) {
        self.view = ViewState::default();
        match self.selected.clone() {
            Some(chat_id) => {
                info!(chat_id = %chat_id, "retrying chat");
                self.statuses.remove(&chat_id);
                if self.poller.restart(&chat_id) {
                    self.view.loading = true;
                }
            }
            None => {
                self.fetcher.cache().remove(&CacheScope::All);
                self.load_aggregate().await;
            }
        }
    }

    /// # Errors
    /// Returns the API error.
    pub async fn toggle_task(&mut self, task_id: &str, completed: bool) -> SyncResult<()> {
        self.fetcher.set_task_completed(task_id, completed).await
    }

    /// Applies one event to the dashboard. Events queued by a poll chain that
    /// has since been stopped or restarted are dropped.
    pub async fn handle_event(&mut self, event: SyncEvent) {
        if let (Some(chat_id), Some(generation)) = (event.chat_id(), event.generation())
            && !self.poller.is_current(chat_id, generation)
        {
            debug!(chat_id = %chat_id, generation, "dropping event from a superseded poll chain");
            return;
        }

        match event {
            SyncEvent::StatusChanged { status, .. } => {
                let Some(chat_id) = status.chat_id.clone() else {
                    return;
                };
                if self.is_selected(&chat_id) {
                    match status.status {
                        ProcessingState::Processing => {
                            self.view.loading = true;
                            self.view.processing = true;
                        }
                        ProcessingState::Completed => self.view.processing = false,
                        ProcessingState::Error => {
                            self.view.processing = false;
                            self.view.loading = false;
                        }
                        ProcessingState::Idle => {}
                    }
                }
                self.statuses.insert(chat_id, status);
            }
            SyncEvent::PollFailed {
                chat_id, message, ..
            } => {
                if self.is_selected(&chat_id) {
                    self.fail(message);
                } else {
                    debug!(chat_id = %chat_id, message = %message, "poll failure for another chat");
                }
            }
            SyncEvent::TasksUpdated { chat_id, count, .. } => {
                if self.concerns_view(chat_id.as_ref()) {
                    self.view.loading = false;
                    self.view.error = None;
                }
                debug!(chat_id = ?chat_id, count, "tasks updated");
            }
            SyncEvent::FetchFailed {
                chat_id,
                message,
                served_stale,
                ..
            } => {
                if self.concerns_view(chat_id.as_ref()) {
                    self.view.loading = false;
                    self.view.processing = false;
                    if !served_stale {
                        self.view.error = Some(message);
                    }
                }
            }
            SyncEvent::Update(update) => self.apply_update(update).await,
            SyncEvent::StreamState(state) => self.stream_state = state,
        }
    }

    async fn apply_update(&mut self, update: UpdateEvent) {
        match update {
            UpdateEvent::NewTask { chat_id, .. } | UpdateEvent::NewTasks { chat_id, .. } => {
                if self.selected.is_none() || self.is_selected(&chat_id) {
                    info!(chat_id = %chat_id, "new tasks announced, refreshing");
                    if let Err(err) = self.fetcher.fetch_tasks_for_chat(&chat_id).await {
                        warn!(chat_id = %chat_id, error = %err, "refresh after update failed");
                    }
                }
            }
            // Progress only; state changes come from the poller.
            UpdateEvent::PollingUpdate { chat_id, data } => {
                let Some(count) = data.processed_messages else {
                    return;
                };
                self.statuses
                    .entry(chat_id.clone())
                    .or_insert_with(|| {
                        ChatProcessingStatus::new(chat_id, ProcessingState::Processing)
                    })
                    .set_processed_messages(count);
            }
            UpdateEvent::Unknown => {}
        }
    }

    /// Waits for the next event and applies it. `None` once every sender is gone.
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        let event = self.events.recv().await?;
        self.handle_event(event.clone()).await;
        Some(event)
    }

    /// Applies every event already queued and returns how many there were.
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Drives the event loop until `cancel` fires, then stops every poll chain.
    pub async fn run_until(&mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = self.next_event() => if event.is_none() { break },
            }
        }
        self.shutdown();
    }

    pub fn shutdown(&self) {
        self.poller.stop_all();
    }

    /// Filtered, sorted copy of the tasks for the current selection.
    #[must_use]
    pub fn visible_tasks(&self, filter: TaskFilter, sort: SortOrder) -> Vec<Task> {
        view::project(
            &self.fetcher.snapshot(&CacheScope::All),
            self.selected.as_ref(),
            filter,
            sort,
        )
    }

    fn is_selected(&self, chat_id: &ChatId) -> bool {
        self.selected.as_ref() == Some(chat_id)
    }

    /// Whether an event for `chat_id` affects what is on screen.
    fn concerns_view(&self, chat_id: Option<&ChatId>) -> bool {
        match (&self.selected, chat_id) {
            (None, _) => true,
            (Some(selected), Some(chat_id)) => selected == chat_id,
            (Some(_), None) => false,
        }
    }

    fn fail(&mut self, message: String) {
        warn!(message = %message, "dashboard error");
        self.view.loading = false;
        self.view.processing = false;
        self.view.error = Some(message);
    }
}
