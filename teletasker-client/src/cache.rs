//! # Local task cache
//!
//! Chat id → task list entries with a time-to-live, kept in a string-keyed
//! [`KeyValueStore`]. Entries older than the TTL are never returned and are
//! removed when encountered.

use std::{
    collections::BTreeMap,
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::Utc;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use shared::models::{AGGREGATE_NAME, ChatId, Task};
use tracing::{debug, warn};

/// Namespace shared by every task cache key.
pub const CACHE_PREFIX: &str = "task_cache_";

/// Escaped in file names: everything outside `[A-Za-z0-9_-]`.
const FILE_NAME: &AsciiSet = &NON_ALPHANUMERIC.remove(b'_').remove(b'-');

/// Durable string-keyed storage behind the cache.
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// # Errors
    /// Returns the underlying storage error.
    fn get(&self, key: &str) -> io::Result<Option<String>>;

    /// # Errors
    /// Returns the underlying storage error.
    fn set(&self, key: &str, value: &str) -> io::Result<()>;

    /// Removing a missing key is not an error.
    ///
    /// # Errors
    /// Returns the underlying storage error.
    fn remove(&self, key: &str) -> io::Result<()>;

    /// # Errors
    /// Returns the underlying storage error.
    fn keys(&self) -> io::Result<Vec<String>>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> io::Error {
    io::Error::other("memory store lock poisoned")
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> io::Result<Vec<String>> {
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        Ok(entries.keys().cloned().collect())
    }
}

/// One JSON file per key in a directory, so the cache survives restarts.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (and creates) the store directory.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", utf8_percent_encode(key, FILE_NAME)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let path = self.path_for(key);
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, value)?;
        fs::rename(&staging, &path)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    fn keys(&self) -> io::Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            match percent_decode_str(stem).decode_utf8() {
                Ok(key) => keys.push(key.into_owned()),
                Err(err) => warn!(file = stem, error = %err, "skipping undecodable cache file"),
            }
        }
        Ok(keys)
    }
}

/// Which task list a cache entry holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheScope {
    /// The aggregate "all chats" view.
    All,
    Chat(ChatId),
}

impl CacheScope {
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::All => format!("{CACHE_PREFIX}{AGGREGATE_NAME}"),
            Self::Chat(chat_id) => format!("{CACHE_PREFIX}{chat_id}"),
        }
    }
}

impl From<Option<&ChatId>> for CacheScope {
    fn from(chat_id: Option<&ChatId>) -> Self {
        chat_id.map_or(Self::All, |id| Self::Chat(id.clone()))
    }
}

impl From<&ChatId> for CacheScope {
    fn from(chat_id: &ChatId) -> Self {
        Self::Chat(chat_id.clone())
    }
}

/// Stored payload: the task list and when it was written (epoch millis).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub tasks: Vec<Task>,
    pub timestamp: i64,
}

/// TTL cache of task lists. Last write wins.
#[derive(Clone, Debug)]
pub struct TaskCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl TaskCache {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Cache over a fresh [`MemoryStore`].
    #[must_use]
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryStore::new()), ttl)
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached tasks for `scope`, or `None` when absent, unreadable or older
    /// than the TTL. Stale and unreadable entries are deleted.
    #[must_use]
    pub fn get(&self, scope: &CacheScope) -> Option<Vec<Task>> {
        let key = scope.key();
        let raw = match self.store.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(key = %key, error = %err, "error reading from cache");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(key = %key, error = %err, "discarding unreadable cache entry");
                self.remove_key(&key);
                return None;
            }
        };

        let age_ms = Utc::now().timestamp_millis().saturating_sub(entry.timestamp);
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        if age_ms > ttl_ms {
            debug!(key = %key, age_ms, "cache entry expired");
            self.remove_key(&key);
            return None;
        }

        Some(entry.tasks)
    }

    /// Overwrites the entry for `scope` and stamps it with the current time.
    pub fn set(&self, scope: &CacheScope, tasks: &[Task]) {
        self.write_entry(
            scope,
            &CacheEntry {
                tasks: tasks.to_vec(),
                timestamp: Utc::now().timestamp_millis(),
            },
        );
    }

    /// Writes an entry verbatim, timestamp included.
    pub fn write_entry(&self, scope: &CacheScope, entry: &CacheEntry) {
        let key = scope.key();
        match serde_json::to_string(entry) {
            Ok(payload) => {
                if let Err(err) = self.store.set(&key, &payload) {
                    warn!(key = %key, error = %err, "error writing to cache");
                }
            }
            Err(err) => warn!(key = %key, error = %err, "error serializing cache entry"),
        }
    }

    /// Whether a fresh entry exists for `scope`.
    #[must_use]
    pub fn is_fresh(&self, scope: &CacheScope) -> bool {
        self.get(scope).is_some()
    }

    /// Removes one chat's entry, or every task cache entry when `chat_id` is
    /// `None`.
    pub fn invalidate(&self, chat_id: Option<&ChatId>) {
        match chat_id {
            Some(chat_id) => self.remove(&CacheScope::Chat(chat_id.clone())),
            None => match self.store.keys() {
                Ok(keys) => keys
                    .iter()
                    .filter(|key| key.starts_with(CACHE_PREFIX))
                    .for_each(|key| self.remove_key(key)),
                Err(err) => warn!(error = %err, "error listing cache entries"),
            },
        }
    }

    /// Removes exactly the entry for `scope`.
    pub fn remove(&self, scope: &CacheScope) {
        self.remove_key(&scope.key());
    }

    fn remove_key(&self, key: &str) {
        if let Err(err) = self.store.remove(key) {
            warn!(key = %key, error = %err, "error removing cache entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::task;
    use tempfile::TempDir;

    const TTL: Duration = Duration::from_secs(300);

    #[test]
    fn set_then_get_returns_tasks() {
        let cache = TaskCache::in_memory(TTL);
        let scope = CacheScope::Chat(ChatId::from(42));

        cache.set(&scope, &[task("T1", "42")]);

        let cached = cache.get(&scope).unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].id, "T1");
        assert!(cache.get(&CacheScope::All).is_none());
    }

    #[test]
    fn expired_entries_are_absent_and_deleted() {
        let store = Arc::new(MemoryStore::new());
        let cache = TaskCache::new(store.clone(), TTL);
        let scope = CacheScope::Chat(ChatId::from(42));
        let six_minutes_ago = Utc::now().timestamp_millis() - 6 * 60 * 1000;

        cache.write_entry(
            &scope,
            &CacheEntry {
                tasks: vec![task("T1", "42")],
                timestamp: six_minutes_ago,
            },
        );

        assert!(cache.get(&scope).is_none());
        assert_eq!(store.get(&scope.key()).unwrap(), None);
    }

    #[test]
    fn entries_within_ttl_survive() {
        let cache = TaskCache::in_memory(TTL);
        let scope = CacheScope::All;
        let four_minutes_ago = Utc::now().timestamp_millis() - 4 * 60 * 1000;

        cache.write_entry(
            &scope,
            &CacheEntry {
                tasks: vec![task("T1", "1"), task("T2", "2")],
                timestamp: four_minutes_ago,
            },
        );

        assert_eq!(cache.get(&scope).map(|tasks| tasks.len()), Some(2));
    }

    #[test]
    fn corrupt_entries_are_dropped() {
        let store = Arc::new(MemoryStore::new());
        let cache = TaskCache::new(store.clone(), TTL);
        store.set("task_cache_9", "{not json").unwrap();

        assert!(cache.get(&CacheScope::Chat(ChatId::from(9))).is_none());
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn invalidate_one_or_all_within_namespace() {
        let store = Arc::new(MemoryStore::new());
        let cache = TaskCache::new(store.clone(), TTL);
        store.set("auth_token", "secret").unwrap();
        cache.set(&CacheScope::Chat(ChatId::from(1)), &[task("A", "1")]);
        cache.set(&CacheScope::Chat(ChatId::from(2)), &[task("B", "2")]);
        cache.set(&CacheScope::All, &[task("A", "1"), task("B", "2")]);

        cache.invalidate(Some(&ChatId::from(1)));
        assert!(!cache.is_fresh(&CacheScope::Chat(ChatId::from(1))));
        assert!(cache.is_fresh(&CacheScope::Chat(ChatId::from(2))));

        cache.invalidate(None);
        assert_eq!(store.keys().unwrap(), vec!["auth_token".to_string()]);
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let scope = CacheScope::Chat(ChatId::new("-100 77"));

        {
            let store = Arc::new(FileStore::open(dir.path()).unwrap());
            TaskCache::new(store, TTL).set(&scope, &[task("T9", "-100 77")]);
        }

        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        assert_eq!(store.keys().unwrap(), vec![scope.key()]);
        let cache = TaskCache::new(store, TTL);
        assert_eq!(cache.get(&scope).unwrap()[0].id, "T9");

        cache.remove(&scope);
        cache.remove(&scope);
        assert!(cache.get(&scope).is_none());
    }

    #[test]
    fn file_store_escapes_keys_in_file_names() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.set("task_cache_a/b c%", "[]").unwrap();

        assert!(dir.path().join("task_cache_a%2Fb%20c%25.json").exists());
        assert_eq!(store.keys().unwrap(), vec!["task_cache_a/b c%".to_string()]);
        assert_eq!(store.get("task_cache_a/b c%").unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn file_store_skips_undecodable_names() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("task_cache_%FF.json"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let store = FileStore::open(dir.path()).unwrap();

        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn aggregate_key_is_distinct_from_chat_keys() {
        assert_eq!(CacheScope::All.key(), "task_cache_all");
        assert_eq!(CacheScope::Chat(ChatId::from(-100)).key(), "task_cache_-100");
        assert!("all".parse::<ChatId>().is_err());
    }
}
