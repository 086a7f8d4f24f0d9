//! SQLite-backed store shared by every worker process on a host.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tokio::sync::Mutex;

use super::{StoreError, TaskStore};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS list_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL,
    pos INTEGER NOT NULL,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_list_items_key_pos ON list_items(key, pos);

CREATE TABLE IF NOT EXISTS sorted_members (
    key TEXT NOT NULL,
    member TEXT NOT NULL,
    score REAL NOT NULL,
    PRIMARY KEY (key, member)
);

CREATE INDEX IF NOT EXISTS idx_sorted_members_score ON sorted_members(key, score DESC);

CREATE TABLE IF NOT EXISTS hash_fields (
    key TEXT NOT NULL,
    field TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (key, field)
);

CREATE TABLE IF NOT EXISTS stream_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL,
    entry TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stream_entries_key ON stream_entries(key, id);

CREATE TABLE IF NOT EXISTS published_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel TEXT NOT NULL,
    message TEXT NOT NULL,
    published_at TEXT NOT NULL
);
"#;

/// Published messages are kept for late readers, up to this many.
const PUBLISHED_RETENTION: i64 = 10_000;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub async fn open(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(format!("Failed to create store dir: {}", e)))?;
        }

        let db_path = path.clone();
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.execute_batch(SCHEMA)?;
            Ok::<_, rusqlite::Error>(conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))??;

        tracing::debug!("Opened SQLite store at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
        .map_err(StoreError::from)
    }
}

fn head_pos(conn: &Connection, key: &str) -> Result<i64, rusqlite::Error> {
    conn.query_row(
        "SELECT COALESCE(MIN(pos), 0) - 1 FROM list_items WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
}

#[async_trait]
impl TaskStore for SqliteStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)))
            .await
            .map(|_| ())
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let pos = head_pos(&tx, &key)?;
            tx.execute(
                "INSERT INTO list_items (key, pos, value) VALUES (?1, ?2, ?3)",
                params![key, pos, value],
            )?;
            tx.commit()
        })
        .await
    }

    async fn list_move(&self, src: &str, dst: &str) -> Result<Option<String>, StoreError> {
        let src = src.to_string();
        let dst = dst.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let tail: Option<(i64, String)> = tx
                .query_row(
                    "SELECT id, value FROM list_items WHERE key = ?1 ORDER BY pos DESC LIMIT 1",
                    params![src],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((id, value)) = tail else {
                return Ok(None);
            };
            tx.execute("DELETE FROM list_items WHERE id = ?1", params![id])?;
            let pos = head_pos(&tx, &dst)?;
            tx.execute(
                "INSERT INTO list_items (key, pos, value) VALUES (?1, ?2, ?3)",
                params![dst, pos, value],
            )?;
            tx.commit()?;
            Ok(Some(value))
        })
        .await
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM list_items WHERE id = (
                     SELECT id FROM list_items WHERE key = ?1 AND value = ?2
                     ORDER BY pos ASC LIMIT 1
                 )",
                params![key, value],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT value FROM list_items WHERE key = ?1 ORDER BY pos ASC")?;
            let values = stmt
                .query_map(params![key], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(values)
        })
        .await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let prefix = prefix.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT key FROM list_items
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key ASC",
            )?;
            let keys = stmt
                .query_map(params![prefix], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(keys)
        })
        .await
    }

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let key = key.to_string();
        let member = member.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sorted_members (key, member, score) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key, member) DO UPDATE SET score = excluded.score",
                params![key, member, score],
            )?;
            Ok(())
        })
        .await
    }

    async fn sorted_range_desc(&self, key: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT member FROM sorted_members WHERE key = ?1
                 ORDER BY score DESC, member DESC LIMIT ?2",
            )?;
            let members = stmt
                .query_map(params![key, limit as i64], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(members)
        })
        .await
    }

    async fn sorted_len(&self, key: &str) -> Result<usize, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sorted_members WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        let field = field.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO hash_fields (key, field, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
                params![key, field, value],
            )?;
            Ok(())
        })
        .await
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        let field = field.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT value FROM hash_fields WHERE key = ?1 AND field = ?2",
                params![key, field],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError> {
        let channel = channel.to_string();
        let message = message.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO published_messages (channel, message, published_at)
                 VALUES (?1, ?2, ?3)",
                params![channel, message, now],
            )?;
            tx.execute(
                "DELETE FROM published_messages WHERE id <= (
                     SELECT MAX(id) FROM published_messages
                 ) - ?1",
                params![PUBLISHED_RETENTION],
            )?;
            tx.commit()
        })
        .await
    }

    async fn stream_append(
        &self,
        key: &str,
        entry: &str,
        max_len: usize,
    ) -> Result<(), StoreError> {
        let key = key.to_string();
        let entry = entry.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO stream_entries (key, entry, created_at) VALUES (?1, ?2, ?3)",
                params![key, entry, now],
            )?;
            tx.execute(
                "DELETE FROM stream_entries WHERE key = ?1 AND id NOT IN (
                     SELECT id FROM stream_entries WHERE key = ?1 ORDER BY id DESC LIMIT ?2
                 )",
                params![key, max_len as i64],
            )?;
            tx.commit()
        })
        .await
    }

    async fn stream_recent(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT entry FROM stream_entries WHERE key = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let mut entries = stmt
                .query_map(params![key, count as i64], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            entries.reverse();
            Ok(entries)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("hive.db")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_list_move_is_fifo() {
        let (_dir, store) = open_temp().await;
        store.list_push("q", "first").await.unwrap();
        store.list_push("q", "second").await.unwrap();
        store.list_push("act", "older").await.unwrap();

        let moved = store.list_move("q", "act").await.unwrap();
        assert_eq!(moved.as_deref(), Some("first"));
        assert_eq!(store.list_range("q").await.unwrap(), vec!["second"]);
        assert_eq!(store.list_range("act").await.unwrap(), vec!["first", "older"]);
        assert_eq!(store.list_move("empty", "act").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_remove_and_keys() {
        let (_dir, store) = open_temp().await;
        store.list_push("hive:queue:a", "x").await.unwrap();
        store.list_push("hive:queue:b", "y").await.unwrap();
        store.list_push("other", "z").await.unwrap();

        assert_eq!(
            store.list_keys("hive:queue:").await.unwrap(),
            vec!["hive:queue:a", "hive:queue:b"]
        );
        assert!(store.list_remove("hive:queue:a", "x").await.unwrap());
        assert!(!store.list_remove("hive:queue:a", "x").await.unwrap());
        assert_eq!(store.list_keys("hive:queue:").await.unwrap(), vec!["hive:queue:b"]);
    }

    #[tokio::test]
    async fn test_stream_cap() {
        let (_dir, store) = open_temp().await;
        for i in 0..6 {
            store.stream_append("s", &format!("e{}", i), 4).await.unwrap();
        }
        assert_eq!(
            store.stream_recent("s", 100).await.unwrap(),
            vec!["e2", "e3", "e4", "e5"]
        );
    }

    #[tokio::test]
    async fn test_sorted_and_hash() {
        let (_dir, store) = open_temp().await;
        store.sorted_add("done", "a", 10.0).await.unwrap();
        store.sorted_add("done", "b", 20.0).await.unwrap();
        assert_eq!(store.sorted_range_desc("done", 5).await.unwrap(), vec!["b", "a"]);
        assert_eq!(store.sorted_len("done").await.unwrap(), 2);

        store.hash_set("task:1", "data", "{}").await.unwrap();
        store.hash_set("task:1", "data", "{\"id\":1}").await.unwrap();
        assert_eq!(
            store.hash_get("task:1", "data").await.unwrap().as_deref(),
            Some("{\"id\":1}")
        );
        assert_eq!(store.hash_get("task:2", "data").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("hive.db");
        {
            let store = SqliteStore::open(path.clone()).await.unwrap();
            store.list_push("q", "kept").await.unwrap();
            store.publish("events", "hello").await.unwrap();
        }
        let store = SqliteStore::open(path).await.unwrap();
        assert_eq!(store.list_range("q").await.unwrap(), vec!["kept"]);
    }
}
