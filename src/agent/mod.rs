//! The agent loop: drives one task through a multi-turn, tool-augmented
//! conversation with a backend.
//!
//! # Algorithm
//! 1. Build the system prompt (tools, workspace, branch, ticket) and the
//!    initial user message from the task
//! 2. Call the backend with the full conversation
//! 3. `end_turn`: the concatenated text is the result
//! 4. `tool_use`: run every requested call in order, answer with one
//!    `tool_result` per call, and go back to 2
//! 5. Stop with an error on any other stop reason, on a backend error, or
//!    when the iteration budget runs out
//!
//! Tool failures never end the loop; they are reported to the model as
//! error results.

use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::activity::{truncate_chars, ActivityEntry, ActivityKind, ActivitySink};
use crate::backend::{Backend, BackendError, ContentBlock, Message, StopReason, Usage};
use crate::task::Task;
use crate::tools::{ToolContext, ToolOutput, ToolRegistry};

/// List results shown to the model are cut to this many items.
pub const MAX_LIST_ITEMS: usize = 10;

/// Tool results written to the activity stream are cut to this many characters.
const ACTIVITY_RESULT_CHARS: usize = 500;

const NO_SUMMARY: &str = "Task completed (no summary provided)";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{0}")]
    Backend(#[from] BackendError),

    #[error("Max iterations ({0}) reached")]
    IterationBudgetExceeded(usize),

    #[error("Unexpected stop reason: {0}")]
    UnexpectedStopReason(String),
}

impl AgentError {
    /// Error text recorded on the failed task.
    pub fn task_error(&self) -> String {
        format!("Execution failed: {}", self)
    }
}

/// A finished run.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub result: String,
    pub iterations: usize,
    pub usage: Usage,
    pub conversation: Vec<Message>,
}

pub struct AgentLoop {
    worker_id: String,
    backend: Arc<dyn Backend>,
    tools: Arc<ToolRegistry>,
    tool_ctx: ToolContext,
    activity: Arc<dyn ActivitySink>,
    max_iterations: usize,
    max_output_tokens: u32,
}

impl AgentLoop {
    pub fn new(
        worker_id: impl Into<String>,
        backend: Arc<dyn Backend>,
        tools: Arc<ToolRegistry>,
        tool_ctx: ToolContext,
        activity: Arc<dyn ActivitySink>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            backend,
            tools,
            tool_ctx,
            activity,
            max_iterations: 50,
            max_output_tokens: 8000,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Build the system prompt for a task.
    pub fn system_prompt(&self, task: &Task) -> String {
        let workspace = self.tool_ctx.workspace.display().to_string();
        let project = self
            .tool_ctx
            .workspace
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        let jira = task
            .jira_ticket
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or("N/A");

        format!(
            r#"You are Worker {worker} in the HIVE multi-agent system.

## Available Tools

### Development Tools
- read: Read file contents
- edit: Edit files by string replacement
- write: Write/create files
- bash: Execute shell commands
- grep: Search for patterns in files
- glob: Find files by pattern

### HIVE Coordination Tools (USE THESE - NOT bash commands)
- hive_my_tasks: Check your task queue and active task
- hive_take_task: Take the next task from your queue
- hive_task_done: Mark current task as completed (result parameter optional)
- hive_task_failed: Mark current task as failed (error parameter required)
- hive_config: Read configuration from hive.yaml

IMPORTANT: Use the HIVE tools directly instead of bash commands for coordination.
Example: Use hive_my_tasks instead of running "my-tasks" in bash.

WORKSPACE: {workspace} (project: {project})
BRANCH: {branch}
JIRA TICKET: {jira}

CRITICAL RULES:
1. Work autonomously - use tools without asking for permission
2. Read files before editing them
3. Run tests after making changes - CI MUST be GREEN
4. If tests fail, fix them before finishing
5. Commit changes with clear messages
6. Create PRs when appropriate
7. Use hive_task_done when finished (only if CI is GREEN)
8. Use hive_task_failed if you cannot complete the task

Use your tools effectively to complete the task."#,
            worker = self.worker_id,
            workspace = workspace,
            project = project,
            branch = task.branch_or_default(),
            jira = jira,
        )
    }

    pub fn user_message(task: &Task) -> String {
        format!(
            "TASK: {}\n\nDESCRIPTION:\n{}\n\nComplete this task now using the available tools.",
            task.title, task.description
        )
    }

    /// Run the loop for a task until it finishes or fails.
    pub async fn run(&self, task: &Task) -> Result<AgentRun, AgentError> {
        self.log(
            task,
            ActivityKind::TaskStart,
            &format!("Starting: {}", task.title),
            Some(json!({
                "branch": task.branch_or_default(),
                "jira": task.jira_ticket.clone().unwrap_or_default(),
            })),
        )
        .await;
        info!("Starting autonomous execution of {}: {}", task.id, task.title);

        match self.drive(task).await {
            Ok(run) => {
                info!("Task {} completed after {} iterations", task.id, run.iterations);
                self.log(
                    task,
                    ActivityKind::TaskComplete,
                    &format!("Completed after {} iterations", run.iterations),
                    None,
                )
                .await;
                Ok(run)
            }
            Err(e) => {
                let message = e.task_error();
                error!("Task {}: {}", task.id, message);
                self.log(task, ActivityKind::TaskFailed, &message, None).await;
                Err(e)
            }
        }
    }

    async fn drive(&self, task: &Task) -> Result<AgentRun, AgentError> {
        let system = self.system_prompt(task);
        let specs = self.tools.specs();
        let mut messages = vec![Message::user_text(Self::user_message(task))];
        let mut usage = Usage::default();

        for iteration in 1..=self.max_iterations {
            debug!("Iteration {}/{}", iteration, self.max_iterations);

            let response = self
                .backend
                .send(&messages, &system, self.max_output_tokens, &specs)
                .await?;
            usage = usage.add(&response.usage);
            debug!("Stop reason: {}", response.stop_reason);

            for text in response.content.iter().filter_map(ContentBlock::as_text) {
                if !text.trim().is_empty() {
                    self.log(task, ActivityKind::ClaudeResponse, text, None).await;
                }
            }

            let final_text = response.text();
            let stop_reason = response.stop_reason.clone();
            let content = response.content;
            messages.push(Message::assistant(content.clone()));

            match stop_reason {
                StopReason::EndTurn => {
                    let result = if final_text.trim().is_empty() {
                        NO_SUMMARY.to_string()
                    } else {
                        final_text
                    };
                    return Ok(AgentRun {
                        result,
                        iterations: iteration,
                        usage,
                        conversation: messages,
                    });
                }
                StopReason::ToolUse => {
                    let results = self.run_tools(task, &content).await;
                    if results.is_empty() {
                        return Err(AgentError::UnexpectedStopReason(
                            "tool_use without tool calls".to_string(),
                        ));
                    }
                    messages.push(Message::user(results));
                }
                StopReason::Other(reason) => {
                    return Err(AgentError::UnexpectedStopReason(reason));
                }
            }
        }

        Err(AgentError::IterationBudgetExceeded(self.max_iterations))
    }

    /// Execute every tool call of one turn, strictly in order.
    async fn run_tools(&self, task: &Task, content: &[ContentBlock]) -> Vec<ContentBlock> {
        let mut results = Vec::new();

        for block in content {
            let ContentBlock::ToolUse { id, name, input } = block else {
                continue;
            };

            info!("Executing tool: {}", name);
            debug!("Tool input: {}", input);
            self.log(task, ActivityKind::ToolCall, name, Some(json!({"input": input})))
                .await;

            let result = match self.tools.execute(name, input.clone(), &self.tool_ctx).await {
                Ok(output) => {
                    let text = format_output(&output);
                    debug!("Tool result: {}", truncate_chars(&text, 200));
                    self.log(
                        task,
                        ActivityKind::ToolResult,
                        &truncate_chars(&text, ACTIVITY_RESULT_CHARS),
                        Some(json!({"tool": name})),
                    )
                    .await;
                    ContentBlock::ToolResult {
                        tool_use_id: id.clone(),
                        content: text,
                        is_error: false,
                    }
                }
                Err(e) => {
                    error!("Tool execution failed: {}", e);
                    self.log(task, ActivityKind::ToolError, &e.message, Some(json!({"tool": name})))
                        .await;
                    ContentBlock::ToolResult {
                        tool_use_id: id.clone(),
                        content: format!("Error: {}", e.message),
                        is_error: true,
                    }
                }
            };
            results.push(result);
        }
        results
    }

    async fn log(&self, task: &Task, kind: ActivityKind, content: &str, metadata: Option<Value>) {
        self.activity
            .record(ActivityEntry::new(
                &self.worker_id,
                Some(&task.id),
                kind,
                content,
                metadata,
            ))
            .await;
    }
}

/// Render a tool's success value as the text sent back to the model.
pub fn format_output(output: &ToolOutput) -> String {
    match output {
        ToolOutput::Text(text) => text.clone(),
        ToolOutput::Object(map) => {
            serde_json::to_string_pretty(map).unwrap_or_else(|_| Value::Object(map.clone()).to_string())
        }
        ToolOutput::List(items) if items.is_empty() => "No results found".to_string(),
        ToolOutput::List(items) => {
            let shown = &items[..items.len().min(MAX_LIST_ITEMS)];
            let mut text = serde_json::to_string_pretty(shown)
                .unwrap_or_else(|_| Value::Array(shown.to_vec()).to_string());
            if items.len() > MAX_LIST_ITEMS {
                text.push_str(&format!("\n... and {} more", items.len() - MAX_LIST_ITEMS));
            }
            text
        }
    }
}
