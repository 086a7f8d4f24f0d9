//! Shell command execution tool.
//!
//! Commands run in the workspace:
//! - `bash("ls")` → lists workspace contents
//! - `bash("cargo test", timeout: 600)` → longer-running build step

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::process::Command;

use super::{optional_u64, required_str, Tool, ToolContext, ToolError, ToolOutput};

/// Each output stream is cut to this many characters.
pub const MAX_STREAM_CHARS: usize = 30_000;

/// Sanitize command output to be safe for model consumption.
/// Removes binary garbage while preserving valid text.
fn sanitize_output(bytes: &[u8]) -> String {
    let non_printable_count = bytes
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t')
        .count();

    // More than 10% control bytes is treated as binary.
    if bytes.len() > 100 && non_printable_count > bytes.len() / 10 {
        return format!(
            "[Binary output detected - {} bytes, {}% non-printable]",
            bytes.len(),
            non_printable_count * 100 / bytes.len()
        );
    }

    let text = String::from_utf8_lossy(bytes);
    let mut clean: String = text
        .chars()
        .filter(|&c| c == '\n' || c == '\r' || c == '\t' || (c >= ' ' && c != '\u{FFFD}'))
        .take(MAX_STREAM_CHARS + 1)
        .collect();

    if clean.chars().count() > MAX_STREAM_CHARS {
        clean = clean.chars().take(MAX_STREAM_CHARS).collect();
        clean.push_str("\n... [output truncated]");
    }
    clean
}

/// Run a shell command.
pub struct RunCommand;

#[async_trait]
impl Tool for RunCommand {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command in the workspace. Returns stdout, stderr, and exit code."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Maximum execution time in seconds"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let command = required_str(&args, "command")?;
        let timeout = optional_u64(&args, "timeout")?
            .map(Duration::from_secs)
            .unwrap_or(ctx.default_bash_timeout);

        tracing::info!("Executing command in {:?}: {}", ctx.workspace, command);

        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&ctx.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref home) = ctx.shell_home {
            cmd.env("HOME", home);
        }

        let child = cmd
            .spawn()
            .map_err(|e| ToolError::new(format!("Error executing command: {}", e)))?;

        // Dropping the wait future on timeout kills the child.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::error!("Command execution failed: {}", e);
                return Err(ToolError::new(format!("Error executing command: {}", e)));
            }
            Err(_) => {
                tracing::warn!("Command timed out after {}s: {}", timeout.as_secs(), command);
                return Err(ToolError::new(format!(
                    "Command timed out after {}s: {}",
                    timeout.as_secs(),
                    command
                )));
            }
        };

        let stdout = sanitize_output(&output.stdout);
        let stderr = sanitize_output(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        tracing::debug!(
            "Command completed: exit={}, stdout_len={}, stderr_len={}",
            exit_code,
            stdout.len(),
            stderr.len()
        );

        let mut out = Map::new();
        out.insert("stdout".into(), json!(stdout));
        out.insert("stderr".into(), json!(stderr));
        out.insert("exit_code".into(), json!(exit_code));
        out.insert("success".into(), json!(output.status.success()));
        Ok(ToolOutput::Object(out))
    }
}
