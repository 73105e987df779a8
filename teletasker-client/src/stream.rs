//! # Update stream client
//!
//! Keeps one push-channel connection open for the whole session and forwards
//! `update` events to the controller. The connection is authenticated with a
//! `token` query parameter; when the auth session announces a new token the
//! connection is torn down and reopened with it.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use reqwest::{StatusCode, header::ACCEPT};
use shared::{config::SyncConfig, models::UpdateEvent};
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    api::HttpTaskApi,
    auth::AuthSession,
    events::{EventSender, StreamState, SyncEvent},
    sse::{SseDecoder, SseEvent},
};

const STREAM_ENDPOINT: &str = "tasks/updates/stream";

/// How one connection attempt ended.
#[derive(Debug)]
enum Outcome {
    /// Never got a stream; the attempt was still connecting.
    ConnectFailed(String),
    /// The backend refused the token.
    Rejected(StatusCode),
    /// An open stream ended or broke.
    Closed(Option<String>),
    TokenRefreshed,
}

#[derive(Debug)]
pub struct UpdateStream {
    api: HttpTaskApi,
    auth: Arc<dyn AuthSession>,
    events: EventSender,
    backoff: Duration,
    state: watch::Sender<StreamState>,
    last_ping: Mutex<Option<DateTime<Utc>>>,
}

impl UpdateStream {
    #[must_use]
    pub fn new(api: HttpTaskApi, events: EventSender, config: &SyncConfig) -> Self {
        let (state, _) = watch::channel(StreamState::Closed);
        Self {
            auth: Arc::clone(api.auth()),
            api,
            events,
            backoff: config.reconnect_backoff(),
            state,
            last_ping: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Receiver observing connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    /// When the last keep-alive arrived.
    #[must_use]
    pub fn last_ping(&self) -> Option<DateTime<Utc>> {
        *self.last_ping.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs [`Self::run`] on a new task.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let stream = Arc::clone(self);
        tokio::spawn(async move { stream.run(cancel).await })
    }

    /// Connect, read, reconnect until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut refreshed = self.auth.subscribe();
        loop {
            let Some(token) = self.auth.token() else {
                debug!("no token for the update stream yet");
                if !self.wait_before_reconnect(&cancel, &mut refreshed).await {
                    break;
                }
                continue;
            };

            self.set_state(StreamState::Connecting);
            let outcome = tokio::select! {
                () = cancel.cancelled() => break,
                () = next_refresh(&mut refreshed) => Outcome::TokenRefreshed,
                outcome = self.connect_and_read(&token) => outcome,
            };
            let was_open = self.state() == StreamState::Open;
            self.set_state(StreamState::Closed);

            match outcome {
                Outcome::TokenRefreshed => {
                    info!("token refreshed, reopening update stream");
                    continue;
                }
                Outcome::ConnectFailed(reason) => {
                    debug!(reason = %reason, "update stream connect failed");
                }
                Outcome::Rejected(status) => {
                    warn!(%status, "update stream rejected the token");
                    self.auth.request_refresh();
                    // Skip the notification we just caused; an unchanged token waits.
                    refreshed = refreshed.resubscribe();
                    if self.auth.token().is_some_and(|fresh| fresh != token) {
                        continue;
                    }
                }
                Outcome::Closed(reason) => {
                    warn!(
                        was_open,
                        reason = reason.as_deref().unwrap_or("end of stream"),
                        backoff = ?self.backoff,
                        "update stream closed, reconnecting"
                    );
                }
            }

            if !self.wait_before_reconnect(&cancel, &mut refreshed).await {
                break;
            }
        }
        self.set_state(StreamState::Closed);
        info!("update stream stopped");
    }

    async fn connect_and_read(&self, token: &str) -> Outcome {
        let url = match self.api.stream_url(token) {
            Ok(url) => url,
            Err(err) => return Outcome::ConnectFailed(err.to_string()),
        };
        let response = match self
            .api
            .http_client()
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
        {
            Ok(response) => response,
            // Never log the URL: it carries the token.
            Err(err) => return Outcome::ConnectFailed(err.without_url().to_string()),
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Outcome::Rejected(status);
        }
        if !status.is_success() {
            return Outcome::ConnectFailed(format!("{STREAM_ENDPOINT} answered {status}"));
        }

        self.set_state(StreamState::Open);
        info!("update stream connected");

        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for event in decoder.push(&bytes) {
                        self.dispatch(event);
                    }
                }
                Err(err) => return Outcome::Closed(Some(err.without_url().to_string())),
            }
        }
        Outcome::Closed(None)
    }

    fn dispatch(&self, event: SseEvent) {
        match event.event.as_str() {
            "ping" => {
                *self.last_ping.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
                trace!("update stream ping");
            }
            "update" => match serde_json::from_str::<UpdateEvent>(&event.data) {
                Ok(UpdateEvent::Unknown) => debug!(data = %event.data, "ignoring unknown update"),
                Ok(update) => {
                    debug!(chat_id = ?update.chat_id(), "update received");
                    self.emit(SyncEvent::Update(update));
                }
                Err(err) => warn!(error = %err, data = %event.data, "dropping unparseable update"),
            },
            other => debug!(event = other, "ignoring stream event"),
        }
    }

    /// Waits out the backoff; a token refresh cuts the wait short. Returns
    /// `false` once cancelled.
    async fn wait_before_reconnect(
        &self,
        cancel: &CancellationToken,
        refreshed: &mut broadcast::Receiver<String>,
    ) -> bool {
        tokio::select! {
            () = cancel.cancelled() => false,
            () = next_refresh(refreshed) => true,
            () = sleep(self.backoff) => true,
        }
    }

    fn set_state(&self, state: StreamState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            trace!(state = state.as_str(), "update stream state");
            self.emit(SyncEvent::StreamState(state));
        }
    }

    fn emit(&self, event: SyncEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

/// Resolves on the next token refresh. A closed channel never resolves.
async fn next_refresh(refreshed: &mut broadcast::Receiver<String>) {
    loop {
        match refreshed.recv().await {
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
