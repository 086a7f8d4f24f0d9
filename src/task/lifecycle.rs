//! Per-worker task lifecycle: dequeue into the active slot, finalize into a
//! terminal index.
//!
//! # Invariants
//! - The active slot holds at most one task. `dequeue` refuses while it is
//!   occupied, so a task is never in both the queue and the active slot.
//! - Finalizing is idempotent: the terminal record is written before the
//!   active entry is removed, and an entry that is already gone is reported
//!   as [`Transition::AlreadyFinalized`] without writing anything.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use super::board::TaskBoard;
use super::task::{now_string, Task, TaskError, TaskStatus};
use crate::activity::ActivitySink;
use crate::store::TASK_RECORD_FIELD;

/// A task sitting in the active slot, together with the exact payload that
/// put it there.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTask {
    pub task: Task,
    raw: String,
}

impl ActiveTask {
    pub fn id(&self) -> &str {
        &self.task.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed { result: String },
    Failed { error: String },
}

/// A terminal record stamped once, so retries write the same bytes.
#[derive(Debug, Clone)]
pub struct Finalization {
    active: ActiveTask,
    record: Task,
    score: f64,
}

impl Finalization {
    pub fn task_id(&self) -> &str {
        self.active.id()
    }

    pub fn record(&self) -> &Task {
        &self.record
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Recorded,
    /// The active entry was already removed, typically by a coordination tool.
    AlreadyFinalized,
}

pub struct TaskLifecycle {
    board: TaskBoard,
    worker_id: String,
    activity: Arc<dyn ActivitySink>,
}

impl TaskLifecycle {
    pub fn new(board: TaskBoard, worker_id: impl Into<String>, activity: Arc<dyn ActivitySink>) -> Self {
        Self {
            board,
            worker_id: worker_id.into(),
            activity,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn board(&self) -> &TaskBoard {
        &self.board
    }

    /// Activity sink for components running this worker's tasks.
    pub fn activity(&self) -> Arc<dyn ActivitySink> {
        Arc::clone(&self.activity)
    }

    fn active_key(&self) -> String {
        self.board.keys().active(&self.worker_id)
    }

    /// Move the oldest queued task into the active slot.
    ///
    /// `Ok(None)` means the queue was empty and nothing changed. A payload that
    /// does not parse is moved to the dead-letter list and reported as
    /// [`TaskError::Malformed`].
    pub async fn dequeue(&self) -> Result<Option<ActiveTask>, TaskError> {
        let keys = self.board.keys();
        let store = self.board.store();
        let active_key = self.active_key();

        if let Some(occupant) = store.list_range(&active_key).await?.first() {
            let id = Task::parse(occupant)
                .map(|t| t.id)
                .unwrap_or_else(|_| "<unreadable>".to_string());
            return Err(TaskError::ActiveSlotOccupied(id));
        }

        let Some(raw) = store
            .list_move(&keys.queue(&self.worker_id), &active_key)
            .await?
        else {
            return Ok(None);
        };

        let task = match Task::parse(&raw) {
            Ok(task) => task,
            Err(e) => {
                error!("Dropping malformed task payload for {}: {}", self.worker_id, e);
                // The slot is cleared even when dead-lettering fails.
                store.list_remove(&active_key, &raw).await?;
                if let Err(push_err) = store.list_push(&keys.malformed(&self.worker_id), &raw).await {
                    error!(
                        "Failed to dead-letter malformed payload for {}: {} (payload: {})",
                        self.worker_id, push_err, raw
                    );
                }
                return Err(e);
            }
        };

        info!("Dequeued task {}: {}", task.id, task.title);
        let active = ActiveTask { task, raw };
        self.persist_started(&active).await;
        Ok(Some(active))
    }

    /// The task currently in the active slot, if any.
    pub async fn current(&self) -> Result<Option<ActiveTask>, TaskError> {
        let slot = self.board.store().list_range(&self.active_key()).await?;
        match slot.into_iter().next() {
            Some(raw) => {
                let task = Task::parse(&raw)?;
                Ok(Some(ActiveTask { task, raw }))
            }
            None => Ok(None),
        }
    }

    async fn persist_started(&self, active: &ActiveTask) {
        let mut record = active.task.clone();
        record.status = TaskStatus::Active;
        record.worker = Some(self.worker_id.clone());
        record.started_at = Some(now_string());
        let result = match record.to_json() {
            Ok(json) => self
                .board
                .store()
                .hash_set(&self.board.keys().task(&record.id), TASK_RECORD_FIELD, &json)
                .await
                .map_err(TaskError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Failed to persist start of {}: {}", record.id, e);
        }
    }

    /// Stamp the terminal record for `active`. Pure; nothing is written yet.
    pub fn prepare(&self, active: &ActiveTask, outcome: Outcome) -> Finalization {
        let now = Utc::now();
        let mut record = active.task.clone();
        record.worker = Some(self.worker_id.clone());
        match outcome {
            Outcome::Completed { result } => {
                record.status = TaskStatus::Completed;
                record.result = Some(result);
                record.completed_at = Some(now.to_rfc3339());
            }
            Outcome::Failed { error } => {
                record.status = TaskStatus::Failed;
                record.error = Some(error);
                record.failed_at = Some(now.to_rfc3339());
            }
        }
        Finalization {
            active: active.clone(),
            record,
            score: now.timestamp_millis() as f64 / 1000.0,
        }
    }

    /// Write a prepared terminal record and clear the active slot.
    pub async fn finalize(&self, fin: &Finalization) -> Result<Transition, TaskError> {
        let keys = self.board.keys();
        let store = self.board.store();
        let active_key = self.active_key();

        let slot = store.list_range(&active_key).await?;
        if !slot.contains(&fin.active.raw) {
            return Ok(Transition::AlreadyFinalized);
        }

        let (index, verb) = match fin.record.status {
            TaskStatus::Failed => (keys.failed(), "failed"),
            _ => (keys.completed(), "completed"),
        };
        let json = fin.record.to_json()?;
        store.sorted_add(&index, &json, fin.score).await?;
        store
            .hash_set(&keys.task(&fin.record.id), TASK_RECORD_FIELD, &json)
            .await?;
        store.list_remove(&active_key, &fin.active.raw).await?;

        if let Err(e) = store
            .publish(
                &keys.events(),
                &format!("task_{}:{}:{}", verb, self.worker_id, fin.record.id),
            )
            .await
        {
            warn!("Failed to publish {} event for {}: {}", verb, fin.record.id, e);
        }
        info!("Task {} {}", fin.record.id, verb);
        Ok(Transition::Recorded)
    }

    pub async fn complete(&self, active: &ActiveTask, result: &str) -> Result<Transition, TaskError> {
        let fin = self.prepare(
            active,
            Outcome::Completed {
                result: result.to_string(),
            },
        );
        self.finalize(&fin).await
    }

    pub async fn fail(&self, active: &ActiveTask, error: &str) -> Result<Transition, TaskError> {
        let fin = self.prepare(
            active,
            Outcome::Failed {
                error: error.to_string(),
            },
        );
        self.finalize(&fin).await
    }

    /// Finalize whatever is in the active slot. Returns the terminal record.
    pub async fn finish_current(&self, outcome: Outcome) -> Result<Task, TaskError> {
        let active = self.current().await?.ok_or(TaskError::NoActiveTask)?;
        let fin = self.prepare(&active, outcome);
        match self.finalize(&fin).await? {
            Transition::Recorded => Ok(fin.record),
            Transition::AlreadyFinalized => Err(TaskError::NoActiveTask),
        }
    }
}
