//! The worker poll loop.
//!
//! One task at a time: dequeue, run the agent loop, finalize, repeat. The
//! shutdown token is looked at only between tasks; a running task is never
//! pre-empted. A terminal transition that fails on the store is kept and
//! retried before anything new is dequeued.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::AgentLoop;
use crate::task::{ActiveTask, Finalization, Outcome, TaskError, TaskLifecycle, Transition};

/// What one pass of the loop did.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// The queue was empty.
    Idle,
    /// A malformed payload was moved to the dead-letter list.
    Skipped,
    /// A task reached a terminal state.
    Finished { task_id: String, outcome: Outcome },
}

struct PendingFinalization {
    fin: Finalization,
    outcome: Outcome,
}

pub struct Worker {
    lifecycle: Arc<TaskLifecycle>,
    agent: AgentLoop,
    poll_interval: Duration,
    error_pause: Duration,
    pending: Option<PendingFinalization>,
    /// Set after a run: a coordination tool may have taken the next task.
    check_active_slot: bool,
}

impl Worker {
    pub fn new(lifecycle: Arc<TaskLifecycle>, agent: AgentLoop) -> Self {
        Self {
            lifecycle,
            agent,
            poll_interval: Duration::from_secs(1),
            error_pause: Duration::from_secs(10),
            pending: None,
            check_active_slot: false,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_error_pause(mut self, pause: Duration) -> Self {
        self.error_pause = pause;
        self
    }

    /// Poll until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let worker_id = self.lifecycle.worker_id().to_string();
        info!(
            "Worker daemon started - polling {}",
            self.lifecycle.board().keys().queue(&worker_id)
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let pause = match self.tick().await {
                Ok(Tick::Idle) => {
                    debug!("No tasks in queue, sleeping {:?}", self.poll_interval);
                    self.poll_interval
                }
                Ok(Tick::Skipped) | Ok(Tick::Finished { .. }) => continue,
                Err(TaskError::ActiveSlotOccupied(id)) => {
                    warn!(
                        "Active slot of {} still holds task {}; it needs to be cleared manually",
                        worker_id, id
                    );
                    self.error_pause
                }
                Err(e) => {
                    error!("Unexpected error in main loop: {}", e);
                    self.error_pause
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("Worker {} shutting down", worker_id);
    }

    /// One pass: retry a pending transition, or run the next task.
    pub async fn tick(&mut self) -> Result<Tick, TaskError> {
        if let Some(pending) = self.pending.take() {
            return match self.lifecycle.finalize(&pending.fin).await {
                Ok(_) => {
                    info!("Recorded pending transition of {}", pending.fin.task_id());
                    Ok(Tick::Finished {
                        task_id: pending.fin.task_id().to_string(),
                        outcome: pending.outcome,
                    })
                }
                Err(e) => {
                    self.pending = Some(pending);
                    Err(e)
                }
            };
        }

        if self.check_active_slot {
            let current = self.lifecycle.current().await;
            if !matches!(current, Err(TaskError::Store(_))) {
                self.check_active_slot = false;
            }
            if let Some(active) = current? {
                info!("Continuing with task {} taken during the previous run", active.id());
                return self.execute(active).await;
            }
        }

        match self.lifecycle.dequeue().await {
            Ok(None) => Ok(Tick::Idle),
            Ok(Some(active)) => self.execute(active).await,
            Err(TaskError::Malformed { reason }) => {
                warn!("Skipped malformed task payload: {}", reason);
                Ok(Tick::Skipped)
            }
            Err(e) => Err(e),
        }
    }

    async fn execute(&mut self, active: ActiveTask) -> Result<Tick, TaskError> {
        let task_id = active.id().to_string();
        let outcome = match self.agent.run(&active.task).await {
            Ok(run) => Outcome::Completed { result: run.result },
            Err(e) => Outcome::Failed {
                error: e.task_error(),
            },
        };

        self.check_active_slot = true;
        let fin = self.lifecycle.prepare(&active, outcome.clone());
        match self.lifecycle.finalize(&fin).await {
            Ok(Transition::Recorded) => {}
            Ok(Transition::AlreadyFinalized) => {
                info!("Task {} was already finalized during the run", task_id);
            }
            Err(e) => {
                error!("Failed to record outcome of {}, will retry: {}", task_id, e);
                self.pending = Some(PendingFinalization { fin, outcome });
                return Err(e);
            }
        }

        Ok(Tick::Finished { task_id, outcome })
    }
}
