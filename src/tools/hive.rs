//! HIVE coordination tools.
//!
//! Queen-side tools (`hive_assign`, `hive_status`, `hive_failed`) work on the
//! shared [`TaskBoard`]. Worker-side tools act on this worker's own queue
//! through its [`TaskLifecycle`] and fail when no worker identity is set.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::{optional_str, required_str, Tool, ToolContext, ToolError, ToolOutput};
use crate::task::{Outcome, Task, TaskBoard, TaskError, TaskLifecycle, TaskSummary};

/// Shared configuration file read by `hive_config`, relative to the workspace.
pub const CONFIG_FILE: &str = "hive.yaml";

const FAILED_LISTING_LIMIT: usize = 50;

/// What the coordination tools operate on.
#[derive(Clone)]
pub struct Coordination {
    board: TaskBoard,
    lifecycle: Option<Arc<TaskLifecycle>>,
}

impl Coordination {
    /// Board access only; worker commands will refuse to run.
    pub fn new(board: TaskBoard) -> Self {
        Self {
            board,
            lifecycle: None,
        }
    }

    /// Board access plus this worker's own lifecycle.
    pub fn for_worker(lifecycle: Arc<TaskLifecycle>) -> Self {
        Self {
            board: lifecycle.board().clone(),
            lifecycle: Some(lifecycle),
        }
    }

    fn worker(&self) -> Result<&TaskLifecycle, ToolError> {
        self.lifecycle
            .as_deref()
            .ok_or_else(|| ToolError::new("AGENT_ID not set (not running as worker)"))
    }
}

pub(super) fn tools(coordination: Coordination) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(HiveAssign(coordination.clone())),
        Arc::new(HiveStatus(coordination.clone())),
        Arc::new(HiveFailed(coordination.clone())),
        Arc::new(HiveConfig),
        Arc::new(HiveMyTasks(coordination.clone())),
        Arc::new(HiveTakeTask(coordination.clone())),
        Arc::new(HiveTaskDone(coordination.clone())),
        Arc::new(HiveTaskFailed(coordination)),
    ]
}

fn no_params() -> Value {
    json!({"type": "object", "properties": {}, "required": []})
}

fn object(value: Value) -> ToolOutput {
    ToolOutput::from_json(value)
}

/// Assign a task to a drone's queue.
pub struct HiveAssign(Coordination);

#[async_trait]
impl Tool for HiveAssign {
    fn name(&self) -> &str {
        "hive_assign"
    }

    fn description(&self) -> &str {
        "Assign a task to a specific drone. Creates a task in the drone's queue with optional Jira ticket. Returns task details. (Queen command)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "drone_id": {
                    "type": "string",
                    "description": "ID of the drone to assign task to (e.g., 'drone-1')"
                },
                "title": {
                    "type": "string",
                    "description": "Short task title"
                },
                "description": {
                    "type": "string",
                    "description": "Detailed task description"
                },
                "jira_ticket": {
                    "type": "string",
                    "description": "Optional Jira ticket ID (e.g., 'PROJ-123'). If provided, creates a branch name automatically."
                }
            },
            "required": ["drone_id", "title", "description"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let drone_id = required_str(&args, "drone_id")?;
        let title = required_str(&args, "title")?;
        let description = required_str(&args, "description")?;

        let mut task = Task::new(title, description);
        if let Some(ticket) = optional_str(&args, "jira_ticket") {
            task = task
                .with_jira_ticket(ticket)
                .with_branch(format!("feature/{}", ticket));
        }

        self.0.board.enqueue(drone_id, &task).await.map_err(|e| {
            ToolError::new(format!("Failed to assign task: {}", e))
        })?;

        Ok(object(json!({
            "success": true,
            "task_id": task.id,
            "drone_id": drone_id,
            "title": task.title,
            "branch": task.branch,
            "jira_ticket": task.jira_ticket,
        })))
    }
}

/// Overall status of every worker.
pub struct HiveStatus(Coordination);

#[async_trait]
impl Tool for HiveStatus {
    fn name(&self) -> &str {
        "hive_status"
    }

    fn description(&self) -> &str {
        "View the overall status of the HIVE system. Shows queued, active, completed, and failed tasks for all drones. Returns structured status data. (Queen command)"
    }

    fn parameters_schema(&self) -> Value {
        no_params()
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let overview = self.0.board.overview().await?;
        let status = serde_json::to_value(&overview)
            .map_err(|e| ToolError::new(format!("Error in hive_status: {}", e)))?;
        Ok(object(json!({"success": true, "status": status})))
    }
}

/// Recently failed tasks across the HIVE.
pub struct HiveFailed(Coordination);

#[async_trait]
impl Tool for HiveFailed {
    fn name(&self) -> &str {
        "hive_failed"
    }

    fn description(&self) -> &str {
        "List all failed tasks across the HIVE. Returns details about each failure including drone, error message, and timestamp. (Queen command)"
    }

    fn parameters_schema(&self) -> Value {
        no_params()
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let failed = self.0.board.recent_failed(FAILED_LISTING_LIMIT).await?;
        let tasks: Vec<Value> = failed
            .iter()
            .map(|t| {
                json!({
                    "task_id": t.id,
                    "title": t.title,
                    "drone_id": t.worker,
                    "error": t.error,
                    "failed_at": t.failed_at,
                })
            })
            .collect();
        Ok(object(json!({
            "success": true,
            "count": tasks.len(),
            "failed_tasks": tasks,
        })))
    }
}

/// Read a value from `hive.yaml` in the workspace.
pub struct HiveConfig;

#[async_trait]
impl Tool for HiveConfig {
    fn name(&self) -> &str {
        "hive_config"
    }

    fn description(&self) -> &str {
        "Read a configuration value from hive.yaml. Returns the config value or default if not found. (Queen/Worker command)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": {
                    "type": "string",
                    "description": "Config key to read (e.g., 'workspace.name')"
                },
                "default": {
                    "type": "string",
                    "description": "Default value if key not found"
                }
            },
            "required": ["key"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let key = required_str(&args, "key")?;
        let default = optional_str(&args, "default").unwrap_or("").to_string();

        let path = ctx.workspace.join(CONFIG_FILE);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ToolOutput::Text(default));
            }
            Err(e) => {
                return Err(ToolError::new(format!("Error in hive_config: {}", e)));
            }
        };

        let doc: serde_yaml::Value = serde_yaml::from_str(&contents)
            .map_err(|e| ToolError::new(format!("Invalid {}: {}", CONFIG_FILE, e)))?;

        Ok(ToolOutput::Text(
            lookup_dotted(&doc, key)
                .and_then(render_scalar)
                .unwrap_or(default),
        ))
    }
}

fn lookup_dotted<'a>(doc: &'a serde_yaml::Value, key: &str) -> Option<&'a serde_yaml::Value> {
    key.split('.')
        .filter(|part| !part.is_empty())
        .try_fold(doc, |node, part| match node {
            serde_yaml::Value::Sequence(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
            other => other.get(part),
        })
}

fn render_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Null => None,
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        other => serde_json::to_string(other).ok(),
    }
}

/// This worker's active and queued tasks.
pub struct HiveMyTasks(Coordination);

#[async_trait]
impl Tool for HiveMyTasks {
    fn name(&self) -> &str {
        "hive_my_tasks"
    }

    fn description(&self) -> &str {
        "View tasks assigned to the current worker. Shows active task and queued tasks. Returns structured task data. Uses AGENT_ID environment variable. (Worker command)"
    }

    fn parameters_schema(&self) -> Value {
        no_params()
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let worker = self.0.worker()?;
        let board = worker.board();
        let active = board.active(worker.worker_id()).await?;
        let queued: Vec<TaskSummary> = board
            .queued(worker.worker_id())
            .await?
            .iter()
            .map(TaskSummary::from)
            .collect();

        Ok(object(json!({
            "success": true,
            "agent_id": worker.worker_id(),
            "active": active.as_ref().map(TaskSummary::from),
            "queued": queued,
        })))
    }
}

/// Move the next queued task into the active slot.
pub struct HiveTakeTask(Coordination);

#[async_trait]
impl Tool for HiveTakeTask {
    fn name(&self) -> &str {
        "hive_take_task"
    }

    fn description(&self) -> &str {
        "Take the next task from the worker's queue. Atomically moves task from queue to active. Returns task details or null if queue is empty. Uses AGENT_ID environment variable. (Worker command)"
    }

    fn parameters_schema(&self) -> Value {
        no_params()
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let worker = self.0.worker()?;
        match worker.dequeue().await {
            Ok(None) => Ok(object(json!({
                "success": true,
                "has_task": false,
                "message": "No tasks in queue",
            }))),
            Ok(Some(active)) => {
                info!("Took task {} from the queue via tool call", active.id());
                let task = &active.task;
                Ok(object(json!({
                    "success": true,
                    "has_task": true,
                    "task_id": task.id,
                    "title": task.title,
                    "description": task.description,
                    "branch": task.branch_or_default(),
                    "jira_ticket": task.jira_ticket,
                })))
            }
            Err(TaskError::ActiveSlotOccupied(id)) => Err(ToolError::new(format!(
                "Task {} is still active. Finish it with hive_task_done or hive_task_failed first",
                id
            ))),
            Err(e) => Err(ToolError::new(format!("Error in hive_take_task: {}", e))),
        }
    }
}

/// Mark the active task completed.
pub struct HiveTaskDone(Coordination);

#[async_trait]
impl Tool for HiveTaskDone {
    fn name(&self) -> &str {
        "hive_task_done"
    }

    fn description(&self) -> &str {
        "Mark the current active task as completed successfully. Moves task to completed set and publishes completion event. Uses AGENT_ID environment variable. (Worker command)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "result": {
                    "type": "string",
                    "description": "Optional result summary"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let worker = self.0.worker()?;
        let result = optional_str(&args, "result").unwrap_or("").to_string();
        let record = worker
            .finish_current(Outcome::Completed { result })
            .await
            .map_err(|e| ToolError::new(format!("Failed to mark task done: {}", e)))?;

        Ok(object(json!({
            "success": true,
            "agent_id": worker.worker_id(),
            "task_id": record.id,
        })))
    }
}

/// Mark the active task failed.
pub struct HiveTaskFailed(Coordination);

#[async_trait]
impl Tool for HiveTaskFailed {
    fn name(&self) -> &str {
        "hive_task_failed"
    }

    fn description(&self) -> &str {
        "Mark the current active task as failed. Moves task to failed set with error details. Uses AGENT_ID environment variable. (Worker command)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "error": {
                    "type": "string",
                    "description": "Error message explaining failure"
                }
            },
            "required": ["error"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let worker = self.0.worker()?;
        let error = required_str(&args, "error")?;
        if error.trim().is_empty() {
            return Err(ToolError::new("'error' must not be empty"));
        }
        let record = worker
            .finish_current(Outcome::Failed {
                error: error.to_string(),
            })
            .await
            .map_err(|e| ToolError::new(format!("Failed to mark task failed: {}", e)))?;
        warn!("Task {} marked failed via tool call: {}", record.id, error);

        let mut out = Map::new();
        out.insert("success".into(), json!(true));
        out.insert("agent_id".into(), json!(worker.worker_id()));
        out.insert("task_id".into(), json!(record.id));
        out.insert("error".into(), json!(error));
        Ok(ToolOutput::Object(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::NullActivity;
    use crate::store::{InMemoryStore, Keys, TaskStore};
    use crate::tools::ToolRegistry;

    struct Fixture {
        store: Arc<InMemoryStore>,
        registry: ToolRegistry,
        ctx: ToolContext,
        _dir: tempfile::TempDir,
    }

    fn fixture(as_worker: bool) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let board = TaskBoard::new(store.clone(), Keys::default());
        let coordination = if as_worker {
            Coordination::for_worker(Arc::new(TaskLifecycle::new(
                board,
                "drone-1",
                Arc::new(NullActivity),
            )))
        } else {
            Coordination::new(board)
        };
        let dir = tempfile::tempdir().unwrap();
        Fixture {
            store,
            registry: ToolRegistry::new(coordination),
            ctx: ToolContext::new(dir.path()),
            _dir: dir,
        }
    }

    async fn call(f: &Fixture, tool: &str, args: Value) -> Result<Value, ToolError> {
        f.registry
            .execute(tool, args, &f.ctx)
            .await
            .map(|out| out.to_value())
    }

    #[tokio::test]
    async fn test_assign_then_take_then_done() {
        let f = fixture(true);
        let assigned = call(
            &f,
            "hive_assign",
            json!({"drone_id": "drone-1", "title": "Add login", "description": "OAuth", "jira_ticket": "PROJ-7"}),
        )
        .await
        .unwrap();
        assert_eq!(assigned["success"], true);
        assert_eq!(assigned["branch"], "feature/PROJ-7");
        let task_id = assigned["task_id"].as_str().unwrap().to_string();

        let mine = call(&f, "hive_my_tasks", json!({})).await.unwrap();
        assert_eq!(mine["agent_id"], "drone-1");
        assert_eq!(mine["queued"][0]["id"], task_id.as_str());
        assert!(mine["active"].is_null());

        let taken = call(&f, "hive_take_task", json!({})).await.unwrap();
        assert_eq!(taken["has_task"], true);
        assert_eq!(taken["task_id"], task_id.as_str());

        let err = call(&f, "hive_take_task", json!({})).await.unwrap_err();
        assert!(err.message.contains("still active"));

        let done = call(&f, "hive_task_done", json!({"result": "merged"})).await.unwrap();
        assert_eq!(done["task_id"], task_id.as_str());

        let keys = Keys::default();
        assert!(f.store.list_range(&keys.active("drone-1")).await.unwrap().is_empty());
        assert_eq!(f.store.sorted_len(&keys.completed()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_take_task_on_empty_queue() {
        let f = fixture(true);
        let out = call(&f, "hive_take_task", json!({})).await.unwrap();
        assert_eq!(out["has_task"], false);
        assert_eq!(out["message"], "No tasks in queue");
    }

    #[tokio::test]
    async fn test_task_failed_is_listed() {
        let f = fixture(true);
        call(
            &f,
            "hive_assign",
            json!({"drone_id": "drone-1", "title": "Flaky", "description": "d"}),
        )
        .await
        .unwrap();
        call(&f, "hive_take_task", json!({})).await.unwrap();
        call(&f, "hive_task_failed", json!({"error": "tests red"})).await.unwrap();

        let failed = call(&f, "hive_failed", json!({})).await.unwrap();
        assert_eq!(failed["count"], 1);
        assert_eq!(failed["failed_tasks"][0]["error"], "tests red");
        assert_eq!(failed["failed_tasks"][0]["drone_id"], "drone-1");

        let err = call(&f, "hive_task_failed", json!({})).await.unwrap_err();
        assert_eq!(err.message, "Missing 'error' argument");
    }

    #[tokio::test]
    async fn test_done_without_active_task() {
        let f = fixture(true);
        let err = call(&f, "hive_task_done", json!({})).await.unwrap_err();
        assert!(err.message.starts_with("Failed to mark task done"));
    }

    #[tokio::test]
    async fn test_worker_commands_need_identity() {
        let f = fixture(false);
        for tool in ["hive_my_tasks", "hive_take_task", "hive_task_done", "hive_task_failed"] {
            let err = call(&f, tool, json!({"error": "x"})).await.unwrap_err();
            assert_eq!(err.message, "AGENT_ID not set (not running as worker)", "{}", tool);
        }
        // Queen commands still work.
        let status = call(&f, "hive_status", json!({})).await.unwrap();
        assert_eq!(status["status"]["queued_total"], 0);
    }

    #[tokio::test]
    async fn test_status_counts_queues() {
        let f = fixture(false);
        for drone in ["drone-1", "drone-2", "drone-2"] {
            call(
                &f,
                "hive_assign",
                json!({"drone_id": drone, "title": "t", "description": "d"}),
            )
            .await
            .unwrap();
        }
        let status = call(&f, "hive_status", json!({})).await.unwrap();
        assert_eq!(status["status"]["queued_total"], 3);
        assert_eq!(status["status"]["workers"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_config_dotted_keys_and_default() {
        let f = fixture(false);
        std::fs::write(
            f.ctx.workspace.join(CONFIG_FILE),
            "workspace:\n  name: hive-demo\nagents:\n  count: 3\n  ids: [drone-1, drone-2]\n",
        )
        .unwrap();

        let value = |v: Value| v.as_str().unwrap().to_string();
        assert_eq!(
            value(call(&f, "hive_config", json!({"key": "workspace.name"})).await.unwrap()),
            "hive-demo"
        );
        assert_eq!(
            value(call(&f, "hive_config", json!({"key": "agents.count"})).await.unwrap()),
            "3"
        );
        assert_eq!(
            value(call(&f, "hive_config", json!({"key": "agents.ids.1"})).await.unwrap()),
            "drone-2"
        );
        assert_eq!(
            value(
                call(&f, "hive_config", json!({"key": "missing.key", "default": "fallback"}))
                    .await
                    .unwrap()
            ),
            "fallback"
        );
    }

    #[tokio::test]
    async fn test_config_without_file() {
        let f = fixture(false);
        let out = call(&f, "hive_config", json!({"key": "a.b"})).await.unwrap();
        assert_eq!(out, json!(""));
    }
}
