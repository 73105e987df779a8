//! HTTP access to the task-extraction backend.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    config::RetryConfig,
    models::{
        AddMonitoredChatsRequest, AvailableChat, ChatId, ChatProcessingStatus, ErrorResponse,
        MonitoredChatRecord, RawTask, TaskListResponse, TelegramAuthStatus,
    },
};
use tokio::time::sleep;
use tracing::{debug, trace, warn};
use url::Url;

use crate::{
    auth::AuthSession,
    error::{SyncError, SyncResult},
};

const USER_AGENT: &str = concat!("teletasker/", env!("CARGO_PKG_VERSION"));

/// Escaped inside a single path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn segment(value: &str) -> String {
    utf8_percent_encode(value, SEGMENT).to_string()
}

/// Backend operations the synchronization layer depends on.
#[async_trait]
pub trait TaskApi: Send + Sync + fmt::Debug {
    async fn monitored_chats(&self) -> SyncResult<Vec<MonitoredChatRecord>>;

    async fn add_monitored_chat(&self, chat_id: &ChatId) -> SyncResult<()>;

    async fn add_monitored_chats(&self, chat_ids: &[ChatId]) -> SyncResult<()>;

    async fn remove_monitored_chat(&self, chat_id: &ChatId) -> SyncResult<()>;

    async fn processing_status(&self, chat_id: &ChatId) -> SyncResult<ChatProcessingStatus>;

    /// Raw task records for one chat, envelope already unwrapped.
    async fn chat_tasks(&self, chat_id: &ChatId) -> SyncResult<Vec<RawTask>>;

    async fn set_task_completed(&self, task_id: &str, completed: bool) -> SyncResult<()>;

    /// Every chat the user's Telegram account can see.
    async fn telegram_chats(&self) -> SyncResult<Vec<AvailableChat>>;

    /// Whether the backend holds a logged-in Telegram session.
    async fn telegram_auth_status(&self) -> SyncResult<TelegramAuthStatus>;
}

/// [`TaskApi`] over `reqwest`, authenticated with the session's bearer token.
#[derive(Clone, Debug)]
pub struct HttpTaskApi {
    base_url: Url,
    client: Client,
    auth: Arc<dyn AuthSession>,
    retry: RetryConfig,
}

impl HttpTaskApi {
    /// Create a new API client for the given backend.
    ///
    /// # Errors
    /// Returns [`SyncError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: Url, auth: Arc<dyn AuthSession>, retry: RetryConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|source| SyncError::Http {
                endpoint: base_url.to_string(),
                source,
            })?;
        Ok(Self::with_client(client, base_url, auth, retry))
    }

    #[must_use]
    pub fn with_client(
        client: Client,
        base_url: Url,
        auth: Arc<dyn AuthSession>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            base_url: with_trailing_slash(base_url),
            client,
            auth,
            retry,
        }
    }

    #[must_use]
    pub fn http_client(&self) -> &Client {
        &self.client
    }

    #[must_use]
    pub fn auth(&self) -> &Arc<dyn AuthSession> {
        &self.auth
    }

    fn endpoint(&self, path: &str) -> SyncResult<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|source| SyncError::Url {
                path: path.to_string(),
                source,
            })
    }

    /// URL of the push channel. The token travels as a query parameter
    /// because event-stream consumers cannot rely on custom headers.
    ///
    /// # Errors
    /// Returns [`SyncError::Url`] if the base URL cannot be joined.
    pub fn stream_url(&self, token: &str) -> SyncResult<Url> {
        let mut url = self.endpoint("tasks/updates/stream")?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }

    /// Sends a request, retrying when the token was rejected.
    ///
    /// A `401`, or a `403` whose detail says the token expired, asks the auth
    /// session for a refresh and retries with the latest token. Without any
    /// token nothing is sent.
    async fn send_with_refresh<F>(&self, path: &str, build: F) -> SyncResult<Response>
    where
        F: Fn(&Client, Url) -> RequestBuilder + Send + Sync,
    {
        let url = self.endpoint(path)?;
        let mut attempt = 1;
        loop {
            let Some(token) = self.auth.token() else {
                return Err(SyncError::MissingToken);
            };
            let request = build(&self.client, url.clone()).bearer_auth(token);
            trace!(endpoint = path, attempt, "sending request");

            let response = request.send().await.map_err(|source| SyncError::Http {
                endpoint: path.to_string(),
                source,
            })?;
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let body = response.text().await.unwrap_or_default();
            let error_body: ErrorResponse = serde_json::from_str(&body).unwrap_or_default();
            let wait = if status == StatusCode::UNAUTHORIZED {
                Some(self.retry.backoff(attempt))
            } else if status == StatusCode::FORBIDDEN && error_body.is_token_expired() {
                Some(self.retry.token_refresh_wait())
            } else {
                None
            };

            match wait {
                Some(delay) if attempt < self.retry.max_attempts => {
                    warn!(endpoint = path, %status, attempt, "token rejected, requesting refresh");
                    self.auth.request_refresh();
                    sleep(delay).await;
                    attempt += 1;
                }
                _ => {
                    let trimmed = body.trim();
                    let detail = error_body
                        .message()
                        .or_else(|| (!trimmed.is_empty()).then(|| trimmed.to_string()));
                    return Err(SyncError::Status {
                        endpoint: path.to_string(),
                        status,
                        detail,
                    });
                }
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SyncResult<T> {
        let response = self
            .send_with_refresh(path, |client, url| client.get(url))
            .await?;
        decode(path, response).await
    }
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    async fn monitored_chats(&self) -> SyncResult<Vec<MonitoredChatRecord>> {
        self.get_json("tasks/monitored-chats").await
    }

    async fn add_monitored_chat(&self, chat_id: &ChatId) -> SyncResult<()> {
        let path = format!("tasks/monitored-chats/{}", segment(chat_id.as_str()));
        self.send_with_refresh(&path, |client, url| client.post(url))
            .await?;
        debug!(chat_id = %chat_id, "chat added to monitoring");
        Ok(())
    }

    async fn add_monitored_chats(&self, chat_ids: &[ChatId]) -> SyncResult<()> {
        let payload = AddMonitoredChatsRequest {
            chat_ids: chat_ids.to_vec(),
        };
        self.send_with_refresh("tasks/monitored-chats", |client, url| {
            client.post(url).json(&payload)
        })
        .await?;
        debug!(count = chat_ids.len(), "chats added to monitoring");
        Ok(())
    }

    async fn remove_monitored_chat(&self, chat_id: &ChatId) -> SyncResult<()> {
        let path = format!("tasks/monitored-chats/{}", segment(chat_id.as_str()));
        self.send_with_refresh(&path, |client, url| client.delete(url))
            .await?;
        debug!(chat_id = %chat_id, "chat removed from monitoring");
        Ok(())
    }

    async fn processing_status(&self, chat_id: &ChatId) -> SyncResult<ChatProcessingStatus> {
        let path = format!("tasks/chat/{}/processing-status", segment(chat_id.as_str()));
        let mut status: ChatProcessingStatus = self.get_json(&path).await?;
        if status.chat_id.is_none() {
            status.chat_id = Some(chat_id.clone());
        }
        Ok(status)
    }

    async fn chat_tasks(&self, chat_id: &ChatId) -> SyncResult<Vec<RawTask>> {
        let path = format!("tasks/chat/{}/tasks", segment(chat_id.as_str()));
        let envelope: TaskListResponse = self.get_json(&path).await?;
        Ok(envelope.into_tasks())
    }

    async fn set_task_completed(&self, task_id: &str, completed: bool) -> SyncResult<()> {
        let path = format!("tasks/task/{}/completed", segment(task_id));
        self.send_with_refresh(&path, |client, url| {
            client.patch(url).query(&[("completed", completed)])
        })
        .await?;
        Ok(())
    }

    async fn telegram_chats(&self) -> SyncResult<Vec<AvailableChat>> {
        self.get_json("telethon/chats").await
    }

    async fn telegram_auth_status(&self) -> SyncResult<TelegramAuthStatus> {
        self.get_json("telethon/auth/status").await
    }
}

async fn decode<T: DeserializeOwned>(path: &str, response: Response) -> SyncResult<T> {
    let bytes = response.bytes().await.map_err(|source| SyncError::Http {
        endpoint: path.to_string(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|err| SyncError::Decode {
        endpoint: path.to_string(),
        message: err.to_string(),
    })
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
