pub mod account;
pub mod chats;
pub mod completion;
pub mod config;
pub mod session;
pub mod tasks;
pub mod watch;

use std::{fmt, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use client::{
    SyncResult,
    api::{HttpTaskApi, TaskApi},
    auth::{AuthSession, TokenSession},
    cache::{FileStore, TaskCache},
    controller::Dashboard,
};
use shared::config::Config;
use tokio::time::timeout;

/// Builds the API client from the stored session token.
pub fn connect(config: &Config) -> Result<HttpTaskApi> {
    let token = session::require_token()?;
    let path = session::session_path();
    // A refresh re-reads the token file, picking up a `login` from another shell.
    let tokens = TokenSession::new(Some(token)).with_refresh_hook(Arc::new(move || {
        session::read_token(&path).ok().flatten()
    }));
    let auth: Arc<dyn AuthSession> = Arc::new(tokens);
    HttpTaskApi::new(config.api_base_url.clone(), auth, config.retry.clone())
        .context("failed to build HTTP client")
}

/// Dashboard backed by the durable cache in `config.cache_dir`.
pub fn dashboard(config: &Config, api: HttpTaskApi) -> Result<Dashboard> {
    let store = FileStore::open(&config.cache_dir).with_context(|| {
        format!(
            "failed to open task cache at {}",
            config.cache_dir.display()
        )
    })?;
    let cache = TaskCache::new(Arc::new(store), config.sync.cache_ttl());
    let api: Arc<dyn TaskApi> = Arc::new(api);
    Ok(Dashboard::new(api, cache, &config.sync))
}

/// Applies events until the selection settles. Returns `false` on timeout.
pub async fn settle(dashboard: &mut Dashboard, limit: Duration) -> bool {
    let drive = async {
        while !dashboard.is_settled() {
            if dashboard.next_event().await.is_none() {
                break;
            }
        }
    };
    timeout(limit, drive).await.is_ok()
}

/// Context for backend failures. Rejected credentials and unreachable
/// backends get a next step appended.
pub trait BackendContext<T> {
    fn backend_context<C: fmt::Display>(self, action: C) -> Result<T>;
}

impl<T> BackendContext<T> for SyncResult<T> {
    fn backend_context<C: fmt::Display>(self, action: C) -> Result<T> {
        self.map_err(|err| {
            let hint = if err.is_auth() {
                "; run `teletasker login --token <TOKEN>` with a valid token"
            } else if err.is_transient() {
                "; the backend is unreachable or failing, try again later"
            } else {
                ""
            };
            anyhow::Error::new(err).context(format!("{action}{hint}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use client::SyncError;
    use shared::models::ChatId;

    fn message(result: Result<()>) -> String {
        format!("{:#}", result.unwrap_err())
    }

    #[test]
    fn auth_failures_suggest_logging_in() {
        let result: SyncResult<()> = Err(SyncError::MissingToken);
        let text = message(result.backend_context("failed to fetch monitored chats"));
        assert!(text.starts_with("failed to fetch monitored chats; run `teletasker login"));
        assert!(text.ends_with("no authentication token available"));
    }

    #[test]
    fn other_failures_keep_the_plain_action() {
        let result: SyncResult<()> = Err(SyncError::Extraction {
            chat_id: ChatId::from(3),
            message: "quota exceeded".into(),
        });
        assert_eq!(
            message(result.backend_context("failed to load chat 3")),
            "failed to load chat 3: quota exceeded"
        );
    }
}
