//! Shared queue/store used by workers and the coordinator.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for tests and single-process runs)
//! - `sqlite`: SQLite database shared by every worker on the host
//!
//! The store exposes a small set of single-key atomic primitives (lists,
//! time-ordered sets, hashes, capped streams, publish). Everything the task
//! lifecycle needs is built from these, so no cross-key locking is required.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store task failed: {0}")]
    Join(String),

    #[error("invalid store URL '{0}': expected sqlite://<path> or memory://")]
    InvalidUrl(String),
}

/// Primitive operations of the shared store.
///
/// Lists are ordered head → tail. Producers push at the head, so the tail
/// holds the oldest entry and [`TaskStore::list_move`] gives FIFO delivery.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Whether data survives a process restart.
    fn is_persistent(&self) -> bool;

    /// Connectivity check, run once at startup.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Push `value` at the head of the list.
    async fn list_push(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Atomically pop the tail of `src` and push it at the head of `dst`.
    ///
    /// Returns `None` without touching either list when `src` is empty.
    async fn list_move(&self, src: &str, dst: &str) -> Result<Option<String>, StoreError>;

    /// Remove the first occurrence of `value`. Returns whether one was removed.
    async fn list_remove(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    /// Snapshot of the list, head first.
    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Names of non-empty lists whose key starts with `prefix`, sorted.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Insert `member` or update its score.
    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;

    /// Up to `limit` members, highest score first.
    async fn sorted_range_desc(&self, key: &str, limit: usize) -> Result<Vec<String>, StoreError>;

    async fn sorted_len(&self, key: &str) -> Result<usize, StoreError>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// Fire-and-forget notification on a named channel.
    async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError>;

    /// Append to a capped stream, evicting the oldest entries past `max_len`.
    async fn stream_append(&self, key: &str, entry: &str, max_len: usize)
        -> Result<(), StoreError>;

    /// The newest `count` entries, oldest first.
    async fn stream_recent(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError>;
}

/// Open a store from a `sqlite://<path>` or `memory://` URL.
pub async fn open_store(url: &str) -> Result<Arc<dyn TaskStore>, StoreError> {
    if url == "memory://" || url == "memory" {
        return Ok(Arc::new(InMemoryStore::new()));
    }
    if let Some(path) = url.strip_prefix("sqlite://") {
        if path.is_empty() {
            return Err(StoreError::InvalidUrl(url.to_string()));
        }
        let store = SqliteStore::open(PathBuf::from(path)).await?;
        return Ok(Arc::new(store));
    }
    Err(StoreError::InvalidUrl(url.to_string()))
}

/// Key scheme shared by workers and the coordinator.
#[derive(Debug, Clone)]
pub struct Keys {
    prefix: String,
}

/// Hash field holding the serialized task record.
pub const TASK_RECORD_FIELD: &str = "data";

impl Keys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn queue(&self, worker: &str) -> String {
        format!("{}:queue:{}", self.prefix, worker)
    }

    pub fn queue_prefix(&self) -> String {
        format!("{}:queue:", self.prefix)
    }

    pub fn active(&self, worker: &str) -> String {
        format!("{}:active:{}", self.prefix, worker)
    }

    pub fn active_prefix(&self) -> String {
        format!("{}:active:", self.prefix)
    }

    /// Dead-letter list for payloads that could not be parsed.
    pub fn malformed(&self, worker: &str) -> String {
        format!("{}:malformed:{}", self.prefix, worker)
    }

    pub fn completed(&self) -> String {
        format!("{}:completed", self.prefix)
    }

    pub fn failed(&self) -> String {
        format!("{}:failed", self.prefix)
    }

    pub fn task(&self, task_id: &str) -> String {
        format!("{}:task:{}", self.prefix, task_id)
    }

    pub fn events(&self) -> String {
        format!("{}:events", self.prefix)
    }

    pub fn worker_log(&self, worker: &str) -> String {
        format!("{}:logs:{}", self.prefix, worker)
    }

    pub fn global_log(&self) -> String {
        format!("{}:logs:all", self.prefix)
    }

    pub fn activity_channel(&self, worker: &str) -> String {
        format!("{}:activity:{}", self.prefix, worker)
    }
}

impl Default for Keys {
    fn default() -> Self {
        Self::new("hive")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_scheme() {
        let keys = Keys::default();
        assert_eq!(keys.queue("drone-1"), "hive:queue:drone-1");
        assert_eq!(keys.active("drone-1"), "hive:active:drone-1");
        assert_eq!(keys.task("task-9"), "hive:task:task-9");
        assert_eq!(keys.worker_log("drone-1"), "hive:logs:drone-1");
        assert_eq!(keys.global_log(), "hive:logs:all");
        assert_eq!(keys.activity_channel("drone-1"), "hive:activity:drone-1");
        assert_eq!(Keys::new("test").completed(), "test:completed");
    }

    #[tokio::test]
    async fn test_open_store_urls() {
        let store = open_store("memory://").await.unwrap();
        assert!(!store.is_persistent());
        assert!(matches!(
            open_store("redis://localhost").await,
            Err(StoreError::InvalidUrl(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("hive.db").display());
        let store = open_store(&url).await.unwrap();
        assert!(store.is_persistent());
        store.ping().await.unwrap();
    }
}
