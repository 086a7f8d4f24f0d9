//! In-memory store (non-persistent).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{StoreError, TaskStore};

#[derive(Default)]
struct State {
    lists: HashMap<String, VecDeque<String>>,
    sorted: HashMap<String, Vec<(f64, String)>>,
    hashes: HashMap<String, HashMap<String, String>>,
    streams: HashMap<String, VecDeque<String>>,
    published: Vec<(String, String)>,
}

/// Store held entirely in process memory.
///
/// Operations can be made to fail by name (see [`InMemoryStore::fail_operation`])
/// to exercise degraded-store paths.
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    failing: Arc<std::sync::Mutex<HashSet<&'static str>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            failing: Arc::new(std::sync::Mutex::new(HashSet::new())),
        }
    }

    /// Every message published so far, in order.
    pub async fn published(&self) -> Vec<(String, String)> {
        self.state.lock().await.published.clone()
    }

    /// Make the named operation (e.g. `"stream_append"`) fail until cleared.
    pub fn fail_operation(&self, op: &'static str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(op);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.clear();
        }
    }

    fn check(&self, op: &'static str) -> Result<(), StoreError> {
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(op))
            .unwrap_or(false);
        if failing {
            Err(StoreError::Unavailable(format!("{} unavailable", op)))
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check("ping")
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check("list_push")?;
        let mut state = self.state.lock().await;
        state
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn list_move(&self, src: &str, dst: &str) -> Result<Option<String>, StoreError> {
        self.check("list_move")?;
        let mut state = self.state.lock().await;
        let value = match state.lists.get_mut(src).and_then(|l| l.pop_back()) {
            Some(v) => v,
            None => return Ok(None),
        };
        state
            .lists
            .entry(dst.to_string())
            .or_default()
            .push_front(value.clone());
        Ok(Some(value))
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        self.check("list_remove")?;
        let mut state = self.state.lock().await;
        let Some(list) = state.lists.get_mut(key) else {
            return Ok(false);
        };
        match list.iter().position(|v| v == value) {
            Some(idx) => {
                list.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.check("list_range")?;
        let state = self.state.lock().await;
        Ok(state
            .lists
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.check("list_keys")?;
        let state = self.state.lock().await;
        let mut keys: Vec<String> = state
            .lists
            .iter()
            .filter(|(k, l)| k.starts_with(prefix) && !l.is_empty())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        self.check("sorted_add")?;
        let mut state = self.state.lock().await;
        let set = state.sorted.entry(key.to_string()).or_default();
        match set.iter_mut().find(|(_, m)| m == member) {
            Some(entry) => entry.0 = score,
            None => set.push((score, member.to_string())),
        }
        Ok(())
    }

    async fn sorted_range_desc(&self, key: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        self.check("sorted_range_desc")?;
        let state = self.state.lock().await;
        let mut members = state.sorted.get(key).cloned().unwrap_or_default();
        members.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(members.into_iter().take(limit).map(|(_, m)| m).collect())
    }

    async fn sorted_len(&self, key: &str) -> Result<usize, StoreError> {
        self.check("sorted_len")?;
        let state = self.state.lock().await;
        Ok(state.sorted.get(key).map(Vec::len).unwrap_or(0))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.check("hash_set")?;
        let mut state = self.state.lock().await;
        state
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.check("hash_get")?;
        let state = self.state.lock().await;
        Ok(state.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError> {
        self.check("publish")?;
        let mut state = self.state.lock().await;
        state
            .published
            .push((channel.to_string(), message.to_string()));
        Ok(())
    }

    async fn stream_append(
        &self,
        key: &str,
        entry: &str,
        max_len: usize,
    ) -> Result<(), StoreError> {
        self.check("stream_append")?;
        let mut state = self.state.lock().await;
        let stream = state.streams.entry(key.to_string()).or_default();
        stream.push_back(entry.to_string());
        while stream.len() > max_len {
            stream.pop_front();
        }
        Ok(())
    }

    async fn stream_recent(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError> {
        self.check("stream_recent")?;
        let state = self.state.lock().await;
        let Some(stream) = state.streams.get(key) else {
            return Ok(Vec::new());
        };
        let skip = stream.len().saturating_sub(count);
        Ok(stream.iter().skip(skip).cloned().collect())
    }
}
