//! Coordinator-side view of the shared queues: assign work, inspect status.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::task::{now_string, Task, TaskError, TaskStatus};
use crate::store::{Keys, TaskStore, TASK_RECORD_FIELD};

/// Access to every worker's queue without a worker identity of its own.
#[derive(Clone)]
pub struct TaskBoard {
    store: Arc<dyn TaskStore>,
    keys: Keys,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskSummary {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            status: task.status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSummary {
    pub worker: String,
    pub queued: Vec<TaskSummary>,
    pub active: Option<TaskSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoardOverview {
    pub workers: Vec<WorkerSummary>,
    pub queued_total: usize,
    pub active_total: usize,
    pub completed_total: usize,
    pub failed_total: usize,
}

impl TaskBoard {
    pub fn new(store: Arc<dyn TaskStore>, keys: Keys) -> Self {
        Self { store, keys }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// Put a task at the back of `worker`'s queue and announce it.
    pub async fn enqueue(&self, worker: &str, task: &Task) -> Result<(), TaskError> {
        let mut record = task.clone();
        record.status = TaskStatus::Queued;
        record.worker = Some(worker.to_string());
        if record.created_at.is_none() {
            record.created_at = Some(now_string());
        }
        let json = record.to_json()?;

        self.store
            .hash_set(&self.keys.task(&record.id), TASK_RECORD_FIELD, &json)
            .await?;
        self.store.list_push(&self.keys.queue(worker), &json).await?;
        info!("Assigned task {} to {}", record.id, worker);

        if let Err(e) = self
            .store
            .publish(
                &self.keys.events(),
                &format!("task_assigned:{}:{}", worker, record.id),
            )
            .await
        {
            warn!("Failed to publish assignment of {}: {}", record.id, e);
        }
        Ok(())
    }

    /// Tasks waiting in `worker`'s queue, next-to-run first.
    pub async fn queued(&self, worker: &str) -> Result<Vec<Task>, TaskError> {
        let raw = self.store.list_range(&self.keys.queue(worker)).await?;
        Ok(parse_lenient(raw.iter().rev()))
    }

    /// The task in `worker`'s active slot, if any.
    pub async fn active(&self, worker: &str) -> Result<Option<Task>, TaskError> {
        let raw = self.store.list_range(&self.keys.active(worker)).await?;
        Ok(parse_lenient(raw.iter()).into_iter().next())
    }

    /// The latest persisted record of a task.
    pub async fn record(&self, task_id: &str) -> Result<Option<Task>, TaskError> {
        match self
            .store
            .hash_get(&self.keys.task(task_id), TASK_RECORD_FIELD)
            .await?
        {
            Some(raw) => Ok(Some(Task::parse(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn recent_completed(&self, limit: usize) -> Result<Vec<Task>, TaskError> {
        let raw = self
            .store
            .sorted_range_desc(&self.keys.completed(), limit)
            .await?;
        Ok(parse_lenient(raw.iter()))
    }

    pub async fn recent_failed(&self, limit: usize) -> Result<Vec<Task>, TaskError> {
        let raw = self
            .store
            .sorted_range_desc(&self.keys.failed(), limit)
            .await?;
        Ok(parse_lenient(raw.iter()))
    }

    /// Every worker with queued or active work, plus terminal totals.
    pub async fn overview(&self) -> Result<BoardOverview, TaskError> {
        let mut workers = BTreeSet::new();
        for prefix in [self.keys.queue_prefix(), self.keys.active_prefix()] {
            for key in self.store.list_keys(&prefix).await? {
                if let Some(worker) = key.strip_prefix(prefix.as_str()) {
                    workers.insert(worker.to_string());
                }
            }
        }

        let mut summaries = Vec::with_capacity(workers.len());
        let mut queued_total = 0;
        let mut active_total = 0;
        for worker in workers {
            let queued: Vec<TaskSummary> =
                self.queued(&worker).await?.iter().map(TaskSummary::from).collect();
            let active = self.active(&worker).await?.as_ref().map(TaskSummary::from);
            queued_total += queued.len();
            active_total += usize::from(active.is_some());
            summaries.push(WorkerSummary {
                worker,
                queued,
                active,
            });
        }

        Ok(BoardOverview {
            workers: summaries,
            queued_total,
            active_total,
            completed_total: self.store.sorted_len(&self.keys.completed()).await?,
            failed_total: self.store.sorted_len(&self.keys.failed()).await?,
        })
    }
}

/// Parse payloads, logging and skipping the ones that do not parse.
fn parse_lenient<'a>(raw: impl Iterator<Item = &'a String>) -> Vec<Task> {
    raw.filter_map(|r| match Task::parse(r) {
        Ok(task) => Some(task),
        Err(e) => {
            warn!("Skipping unreadable task entry: {}", e);
            None
        }
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn board() -> (Arc<InMemoryStore>, TaskBoard) {
        let store = Arc::new(InMemoryStore::new());
        (store.clone(), TaskBoard::new(store, Keys::default()))
    }

    #[tokio::test]
    async fn test_enqueue_persists_and_announces() {
        let (store, board) = board();
        let task = Task::new("Fix login", "The login form 500s");
        board.enqueue("drone-1", &task).await.unwrap();

        let queued = board.queued("drone-1").await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].worker.as_deref(), Some("drone-1"));

        let record = board.record(&task.id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Queued);

        let published = store.published().await;
        assert_eq!(
            published,
            vec![(
                "hive:events".to_string(),
                format!("task_assigned:drone-1:{}", task.id)
            )]
        );
    }

    #[tokio::test]
    async fn test_queued_in_delivery_order() {
        let (_store, board) = board();
        let first = Task::new("first", "d");
        let second = Task::new("second", "d");
        board.enqueue("drone-1", &first).await.unwrap();
        board.enqueue("drone-1", &second).await.unwrap();

        let titles: Vec<String> = board
            .queued("drone-1")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_overview_lists_workers() {
        let (store, board) = board();
        board.enqueue("drone-2", &Task::new("a", "d")).await.unwrap();
        board.enqueue("drone-1", &Task::new("b", "d")).await.unwrap();
        store
            .list_move("hive:queue:drone-1", "hive:active:drone-1")
            .await
            .unwrap();
        store.sorted_add("hive:failed", "{}", 1.0).await.unwrap();

        let overview = board.overview().await.unwrap();
        let names: Vec<&str> = overview.workers.iter().map(|w| w.worker.as_str()).collect();
        assert_eq!(names, vec!["drone-1", "drone-2"]);
        assert_eq!(overview.queued_total, 1);
        assert_eq!(overview.active_total, 1);
        assert_eq!(overview.failed_total, 1);
        assert_eq!(overview.completed_total, 0);
        assert_eq!(overview.workers[0].active.as_ref().unwrap().title, "b");
    }
}
