//! Bearer-token session shared by the API client and the update stream.

use std::{
    fmt,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::broadcast;
use tracing::{debug, warn};

const REFRESH_CHANNEL_CAPACITY: usize = 8;

/// Source of the bearer token and of token-rotation notifications.
///
/// The external auth provider sits behind this trait; the synchronization
/// layer never reaches for ambient token state.
pub trait AuthSession: Send + Sync + fmt::Debug {
    /// Current bearer token, if signed in.
    fn token(&self) -> Option<String>;

    /// Notifications carrying each refreshed token. Dropping the receiver
    /// unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<String>;

    /// Signals that the backend rejected the current token as expired.
    fn request_refresh(&self);
}

/// Callback asking the auth provider for a fresh token.
pub type RefreshHook = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// In-process [`AuthSession`] holding the token in memory.
pub struct TokenSession {
    token: RwLock<Option<String>>,
    refreshed: broadcast::Sender<String>,
    refresh_hook: Option<RefreshHook>,
    refresh_requests: AtomicU64,
}

impl TokenSession {
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        let (refreshed, _) = broadcast::channel(REFRESH_CHANNEL_CAPACITY);
        Self {
            token: RwLock::new(token.filter(|t| !t.trim().is_empty())),
            refreshed,
            refresh_hook: None,
            refresh_requests: AtomicU64::new(0),
        }
    }

    /// Installs the callback used when a refresh is requested.
    #[must_use]
    pub fn with_refresh_hook(mut self, hook: RefreshHook) -> Self {
        self.refresh_hook = Some(hook);
        self
    }

    /// Stores a new token and announces it to subscribers.
    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        if let Ok(mut guard) = self.token.write() {
            *guard = Some(token.clone());
        }
        // No subscribers is fine: nothing is connected yet.
        let _ = self.refreshed.send(token);
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.token.write() {
            *guard = None;
        }
    }

    /// How many times a refresh was requested.
    #[must_use]
    pub fn refresh_requests(&self) -> u64 {
        self.refresh_requests.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for TokenSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSession")
            .field("has_token", &self.token().is_some())
            .field("has_refresh_hook", &self.refresh_hook.is_some())
            .field("refresh_requests", &self.refresh_requests())
            .finish()
    }
}

impl AuthSession for TokenSession {
    fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|guard| guard.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.refreshed.subscribe()
    }

    fn request_refresh(&self) {
        let requests = self.refresh_requests.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(requests, "token refresh requested");
        match &self.refresh_hook {
            Some(hook) => match hook() {
                Some(token) => self.set_token(token),
                None => warn!("auth provider returned no token on refresh"),
            },
            None => warn!("token expired and no refresh hook is configured"),
        }
    }
}
