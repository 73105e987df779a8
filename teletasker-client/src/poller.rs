//! # Status poller
//!
//! One poll chain per chat: query the processing status, wait, repeat, until
//! the backend reports a terminal state.
//!
//! Every chain carries the generation it was started with and a
//! [`CancellationToken`]. Stopping a chat bumps its generation and cancels
//! the token, so a response that arrives late is dropped before it can touch
//! statuses, the cache or the task collection. Events a chain already queued
//! carry its generation; [`StatusPoller::is_current`] tells the consumer
//! whether they still apply.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use shared::{
    config::SyncConfig,
    models::{ChatId, ProcessingState},
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    api::TaskApi,
    error::SyncError,
    events::{EventSender, SyncEvent},
    fetcher::TaskFetcher,
};

/// Where a chat's poll chain stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PollState {
    #[default]
    NotStarted,
    Processing,
    Completed,
    Error,
}

impl PollState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

#[derive(Debug, Default)]
struct PollSlot {
    generation: u64,
    cancel: CancellationToken,
    state: PollState,
    active: bool,
}

#[derive(Debug)]
struct PollerInner {
    api: Arc<dyn TaskApi>,
    fetcher: TaskFetcher,
    events: EventSender,
    interval: Duration,
    max_attempts: u32,
    slots: Mutex<HashMap<ChatId, PollSlot>>,
}

/// Cheap to clone; clones share the same chains.
#[derive(Clone, Debug)]
pub struct StatusPoller {
    inner: Arc<PollerInner>,
}

enum Step {
    Continue,
    Done,
}

impl StatusPoller {
    #[must_use]
    pub fn new(fetcher: TaskFetcher, events: EventSender, config: &SyncConfig) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                api: Arc::clone(fetcher.api()),
                fetcher,
                events,
                interval: config.poll_interval(),
                max_attempts: config.max_poll_attempts,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Starts a poll chain for `chat_id` and returns whether one was started.
    ///
    /// No-op while a chain is already running for the chat, or once the chat
    /// completed and its tasks are resident. Must be called within a Tokio
    /// runtime.
    pub fn start(&self, chat_id: &ChatId) -> bool {
        let (generation, cancel) = {
            let mut slots = self.inner.slots();
            let slot = slots.entry(chat_id.clone()).or_default();
            if slot.active {
                debug!(chat_id = %chat_id, generation = slot.generation, "poll chain already running");
                return false;
            }
            if slot.state == PollState::Completed && self.inner.fetcher.has_tasks(chat_id) {
                debug!(chat_id = %chat_id, "chat already processed");
                return false;
            }
            slot.generation += 1;
            slot.cancel = CancellationToken::new();
            slot.active = true;
            (slot.generation, slot.cancel.clone())
        };

        info!(chat_id = %chat_id, generation, "starting status polling");
        let inner = Arc::clone(&self.inner);
        let chat_id = chat_id.clone();
        tokio::spawn(async move { inner.run_chain(chat_id, generation, cancel).await });
        true
    }

    /// Forgets the previous outcome and starts a fresh chain.
    pub fn restart(&self, chat_id: &ChatId) -> bool {
        self.stop(chat_id);
        if let Some(slot) = self.inner.slots().get_mut(chat_id) {
            slot.state = PollState::NotStarted;
        }
        self.start(chat_id)
    }

    /// Cancels the chat's chain. Its pending timer and in-flight response are
    /// discarded.
    pub fn stop(&self, chat_id: &ChatId) {
        if let Some(slot) = self.inner.slots().get_mut(chat_id) {
            PollerInner::cancel_slot(chat_id, slot);
        }
    }

    pub fn stop_all(&self) {
        for (chat_id, slot) in self.inner.slots().iter_mut() {
            PollerInner::cancel_slot(chat_id, slot);
        }
    }

    #[must_use]
    pub fn state(&self, chat_id: &ChatId) -> PollState {
        self.inner
            .slots()
            .get(chat_id)
            .map_or(PollState::NotStarted, |slot| slot.state)
    }

    /// Whether `generation` is the chat's latest chain. Stays true after the
    /// chain finishes, until the chat is stopped or restarted.
    #[must_use]
    pub fn is_current(&self, chat_id: &ChatId, generation: u64) -> bool {
        self.inner.is_latest(chat_id, generation)
    }

    #[must_use]
    pub fn is_active(&self, chat_id: &ChatId) -> bool {
        self.inner
            .slots()
            .get(chat_id)
            .is_some_and(|slot| slot.active)
    }

    /// Chats with a running chain.
    #[must_use]
    pub fn active_chats(&self) -> Vec<ChatId> {
        let mut chats: Vec<ChatId> = self
            .inner
            .slots()
            .iter()
            .filter(|(_, slot)| slot.active)
            .map(|(chat_id, _)| chat_id.clone())
            .collect();
        chats.sort();
        chats
    }
}

impl PollerInner {
    fn slots(&self) -> MutexGuard<'_, HashMap<ChatId, PollSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_slot(chat_id: &ChatId, slot: &mut PollSlot) {
        if slot.active {
            debug!(chat_id = %chat_id, generation = slot.generation, "stopping status polling");
        }
        slot.generation += 1;
        slot.cancel.cancel();
        slot.active = false;
        if !slot.state.is_terminal() {
            slot.state = PollState::NotStarted;
        }
    }

    fn is_running(&self, chat_id: &ChatId, generation: u64) -> bool {
        self.slots()
            .get(chat_id)
            .is_some_and(|slot| slot.active && slot.generation == generation)
    }

    fn is_latest(&self, chat_id: &ChatId, generation: u64) -> bool {
        self.slots()
            .get(chat_id)
            .is_some_and(|slot| slot.generation == generation)
    }

    /// Applies `state` if the chain is still current; returns whether it was.
    fn transition(&self, chat_id: &ChatId, generation: u64, state: PollState) -> bool {
        let mut slots = self.slots();
        match slots.get_mut(chat_id) {
            Some(slot) if slot.active && slot.generation == generation => {
                slot.state = state;
                if state.is_terminal() {
                    slot.active = false;
                }
                true
            }
            _ => false,
        }
    }

    fn emit(&self, event: SyncEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }

    async fn run_chain(&self, chat_id: ChatId, generation: u64, cancel: CancellationToken) {
        let mut attempts = 0;
        loop {
            if attempts >= self.max_attempts {
                if self.transition(&chat_id, generation, PollState::Error) {
                    let err = SyncError::PollLimit {
                        chat_id: chat_id.clone(),
                        attempts,
                    };
                    warn!(chat_id = %chat_id, generation, attempts, "giving up on status polling");
                    self.emit(SyncEvent::PollFailed {
                        chat_id,
                        message: err.to_string(),
                        generation,
                    });
                }
                return;
            }
            attempts += 1;

            let step = tokio::select! {
                () = cancel.cancelled() => return,
                step = self.poll_once(&chat_id, generation, attempts) => step,
            };
            if matches!(step, Step::Done) {
                return;
            }

            tokio::select! {
                () = cancel.cancelled() => return,
                () = sleep(self.interval) => {}
            }
        }
    }

    async fn poll_once(&self, chat_id: &ChatId, generation: u64, attempt: u32) -> Step {
        let result = self.api.processing_status(chat_id).await;
        if !self.is_running(chat_id, generation) {
            debug!(chat_id = %chat_id, generation, "dropping stale status response");
            return Step::Done;
        }

        let status = match result {
            Ok(status) => status,
            Err(err) => {
                error!(chat_id = %chat_id, generation, attempt, error = %err, "status polling failed");
                if self.transition(chat_id, generation, PollState::Error) {
                    self.emit(SyncEvent::PollFailed {
                        chat_id: chat_id.clone(),
                        message: err.to_string(),
                        generation,
                    });
                }
                return Step::Done;
            }
        };

        debug!(
            chat_id = %chat_id,
            generation,
            attempt,
            status = status.status.as_str(),
            processed = status.processed_messages(),
            "status received"
        );
        let state = status.status;
        self.emit(SyncEvent::StatusChanged {
            status: status.clone(),
            generation,
        });

        match state {
            ProcessingState::Processing => {
                self.fetcher.cache().invalidate(Some(chat_id));
                self.transition(chat_id, generation, PollState::Processing);
                Step::Continue
            }
            ProcessingState::Idle => Step::Continue,
            ProcessingState::Completed => {
                if self.transition(chat_id, generation, PollState::Completed) {
                    info!(chat_id = %chat_id, generation, "processing completed, fetching tasks");
                    let is_current = || self.is_latest(chat_id, generation);
                    // Failures are reported by the fetcher.
                    let _ = self
                        .fetcher
                        .fetch_for_chain(chat_id, generation, &is_current)
                        .await;
                }
                Step::Done
            }
            ProcessingState::Error => {
                self.fetcher.cache().invalidate(Some(chat_id));
                if self.transition(chat_id, generation, PollState::Error) {
                    let err = SyncError::Extraction {
                        chat_id: chat_id.clone(),
                        message: status.error_text(),
                    };
                    warn!(chat_id = %chat_id, generation, error = %err, "processing failed");
                    self.emit(SyncEvent::PollFailed {
                        chat_id: chat_id.clone(),
                        message: err.to_string(),
                        generation,
                    });
                }
                Step::Done
            }
        }
    }
}
