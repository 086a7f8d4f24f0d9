//! Activity stream: append-only, capped log of task execution events.
//!
//! Entries are written to a per-worker stream and a global stream and
//! published on the worker's live channel. The stream is for observers only;
//! nothing in the agent loop reads it back, so write failures are logged and
//! dropped.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::store::{Keys, TaskStore};

/// Retention of the per-worker stream.
pub const WORKER_STREAM_CAP: usize = 1000;
/// Retention of the stream shared by all workers.
pub const GLOBAL_STREAM_CAP: usize = 5000;
/// Entry content is cut to this many characters.
pub const MAX_CONTENT_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    TaskStart,
    ClaudeResponse,
    ToolCall,
    ToolResult,
    ToolError,
    TaskComplete,
    TaskFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub task_id: String,
    pub event: ActivityKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ActivityEntry {
    pub fn new(
        agent: &str,
        task_id: Option<&str>,
        event: ActivityKind,
        content: &str,
        metadata: Option<Value>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            agent: agent.to_string(),
            task_id: task_id.unwrap_or("none").to_string(),
            event,
            content: truncate_chars(content, MAX_CONTENT_CHARS),
            metadata,
        }
    }
}

/// Cut `s` to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Destination for activity entries, injected into the components that emit them.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    /// Record one entry. Never fails; sinks swallow their own errors.
    async fn record(&self, entry: ActivityEntry);
}

/// Sink writing to the shared store's capped streams.
pub struct StoreActivityLog {
    store: Arc<dyn TaskStore>,
    keys: Keys,
}

impl StoreActivityLog {
    pub fn new(store: Arc<dyn TaskStore>, keys: Keys) -> Self {
        Self { store, keys }
    }
}

#[async_trait]
impl ActivitySink for StoreActivityLog {
    async fn record(&self, entry: ActivityEntry) {
        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize activity entry: {}", e);
                return;
            }
        };

        let worker_log = self.keys.worker_log(&entry.agent);
        if let Err(e) = self
            .store
            .stream_append(&worker_log, &json, WORKER_STREAM_CAP)
            .await
        {
            warn!("Failed to write activity to {}: {}", worker_log, e);
        }
        if let Err(e) = self
            .store
            .stream_append(&self.keys.global_log(), &json, GLOBAL_STREAM_CAP)
            .await
        {
            warn!("Failed to write activity to global stream: {}", e);
        }
        if let Err(e) = self
            .store
            .publish(&self.keys.activity_channel(&entry.agent), &json)
            .await
        {
            warn!("Failed to publish activity: {}", e);
        }
    }
}

/// Sink that discards everything.
pub struct NullActivity;

#[async_trait]
impl ActivitySink for NullActivity {
    async fn record(&self, _entry: ActivityEntry) {}
}

/// Collects entries in memory.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingActivity {
    entries: tokio::sync::Mutex<Vec<ActivityEntry>>,
}

#[cfg(test)]
impl RecordingActivity {
    pub async fn entries(&self) -> Vec<ActivityEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn kinds(&self) -> Vec<ActivityKind> {
        self.entries.lock().await.iter().map(|e| e.event).collect()
    }
}

#[cfg(test)]
#[async_trait]
impl ActivitySink for RecordingActivity {
    async fn record(&self, entry: ActivityEntry) {
        self.entries.lock().await.push(entry);
    }
}
