//! Local Claude CLI backend.
//!
//! Each call spawns `claude -p --output-format stream-json ...` in the
//! workspace with the whole conversation flattened into one prompt. The CLI
//! keeps no state between calls and runs its own tools, so this backend
//! always reports `end_turn` with the folded text answer.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::events::CliEvent;
use super::{Backend, BackendError, BackendResponse, ContentBlock, Message, StopReason, ToolSpec, Usage};

/// Per-event observer for the CLI's stream, called with each parsed JSON event.
pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Command to run; whitespace-separated leading arguments are allowed.
    pub cli_path: String,
    pub model: String,
    pub workspace: PathBuf,
    pub oauth_token: Option<String>,
}

pub struct CliBackend {
    program: String,
    leading_args: Vec<String>,
    model_alias: String,
    workspace: PathBuf,
    oauth_token: Option<String>,
    on_event: Option<EventCallback>,
}

impl CliBackend {
    /// Check the CLI is runnable and build the backend.
    pub async fn connect(config: CliConfig) -> Result<Self, BackendError> {
        let mut parts = config.cli_path.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| BackendError::Config("CLAUDE_CLI_PATH is empty".to_string()))?;
        let leading_args: Vec<String> = parts.collect();

        let version = check_version(&program, &leading_args).await?;
        info!("Claude CLI available: {}", version);

        Ok(Self {
            program,
            leading_args,
            model_alias: cli_model_alias(&config.model),
            workspace: config.workspace,
            oauth_token: config.oauth_token,
            on_event: None,
        })
    }

    pub fn with_event_callback(mut self, callback: EventCallback) -> Self {
        self.on_event = Some(callback);
        self
    }
}

async fn check_version(program: &str, leading_args: &[String]) -> Result<String, BackendError> {
    let check = Command::new(program)
        .args(leading_args)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(VERSION_CHECK_TIMEOUT, check).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(BackendError::Config(format!(
                "Claude CLI not available at '{}': {}",
                program, e
            )))
        }
        Err(_) => {
            return Err(BackendError::Config(format!(
                "Claude CLI at '{}' did not answer --version within {}s",
                program,
                VERSION_CHECK_TIMEOUT.as_secs()
            )))
        }
    };

    if !output.status.success() {
        return Err(BackendError::Config(format!(
            "Claude CLI at '{}' failed --version: {}",
            program,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Map a full model id to the alias the CLI's `--model` flag understands.
pub fn cli_model_alias(model: &str) -> String {
    if model.contains("opus") {
        "opus".to_string()
    } else {
        "sonnet".to_string()
    }
}

/// Flatten the system prompt and every message's text into one prompt.
pub fn build_prompt(system: &str, messages: &[Message]) -> String {
    let mut prompt = String::from(system);
    prompt.push_str("\n\n");
    for message in messages {
        let text = message.text();
        if text.is_empty() {
            continue;
        }
        prompt.push_str(&message.role.as_str().to_ascii_uppercase());
        prompt.push_str(": ");
        prompt.push_str(&text);
        prompt.push_str("\n\n");
    }
    prompt
}

/// Folds the CLI's line stream into a final answer.
///
/// An assistant text block replaces the running answer, a non-empty `result`
/// event replaces it again, and lines that are not JSON objects are appended
/// verbatim.
#[derive(Debug, Default)]
pub struct StreamFold {
    text: String,
    usage: Usage,
}

impl StreamFold {
    /// Consume one line. Returns the parsed event, if the line was one.
    pub fn push_line(&mut self, line: &str) -> Option<Value> {
        if line.trim().is_empty() {
            return None;
        }
        let value = match serde_json::from_str::<Value>(line.trim()) {
            Ok(value) if value.is_object() => value,
            _ => {
                self.text.push_str(line);
                self.text.push('\n');
                return None;
            }
        };

        match serde_json::from_value::<CliEvent>(value.clone()) {
            Ok(CliEvent::Assistant(evt)) => {
                for text in evt.message.texts() {
                    self.text = text.to_string();
                }
            }
            Ok(CliEvent::Result(res)) => {
                if let Some(result) = res.result.filter(|r| !r.is_empty()) {
                    self.text = result;
                }
                if let Some(usage) = res.usage {
                    self.usage = usage;
                }
                if res.is_error {
                    warn!("Claude CLI reported an error result ({})", res.subtype);
                }
            }
            Ok(_) => {}
            Err(e) => debug!("Unrecognized Claude CLI event: {}", e),
        }
        Some(value)
    }

    pub fn into_parts(self) -> (String, Usage) {
        (self.text, self.usage)
    }
}

#[async_trait]
impl Backend for CliBackend {
    fn id(&self) -> &str {
        "cli"
    }

    fn name(&self) -> &str {
        "Claude CLI"
    }

    async fn send(
        &self,
        messages: &[Message],
        system: &str,
        _max_tokens: u32,
        _tools: &[ToolSpec],
    ) -> Result<BackendResponse, BackendError> {
        let prompt = build_prompt(system, messages);

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .arg("-p")
            .arg("--verbose")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--model")
            .arg(&self.model_alias)
            .arg("--dangerously-skip-permissions")
            .arg(&prompt)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref token) = self.oauth_token {
            cmd.env("CLAUDE_CODE_OAUTH_TOKEN", token);
        }

        debug!(
            "Spawning Claude CLI: model={}, prompt_len={}",
            self.model_alias,
            prompt.len()
        );
        let mut child = cmd
            .spawn()
            .map_err(|e| BackendError::Process(format!("failed to spawn '{}': {}", self.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Process("failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BackendError::Process("failed to capture stderr".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Err(e) = BufReader::new(stderr).read_to_string(&mut buf).await {
                debug!("Failed to read Claude CLI stderr: {}", e);
            }
            buf
        });

        let mut fold = StreamFold::default();
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(event) = fold.push_line(&line) {
                if let Some(ref callback) = self.on_event {
                    callback(&event);
                }
            }
        }

        let status = child.wait().await?;
        let diagnostics = stderr_task.await.unwrap_or_default();
        if !status.success() {
            let detail = diagnostics.trim();
            return Err(BackendError::Process(if detail.is_empty() {
                format!("exited with {}", status)
            } else {
                detail.to_string()
            }));
        }

        let (text, usage) = fold.into_parts();
        let content = if text.is_empty() {
            Vec::new()
        } else {
            vec![ContentBlock::text(text)]
        };
        Ok(BackendResponse {
            content,
            stop_reason: StopReason::EndTurn,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn write_script(dir: &std::path::Path, body: &str) -> String {
        let path = dir.join("fake-claude.sh");
        let script = format!(
            "if [ \"$1\" = \"--version\" ]; then echo '2.0.0 (Claude Code)'; exit 0; fi\n{}\n",
            body
        );
        std::fs::write(&path, script).unwrap();
        format!("/bin/sh {}", path.display())
    }

    fn config(cli_path: String, workspace: &std::path::Path) -> CliConfig {
        CliConfig {
            cli_path,
            model: "claude-sonnet-4-20250514".into(),
            workspace: workspace.to_path_buf(),
            oauth_token: None,
        }
    }

    #[test]
    fn test_model_alias() {
        assert_eq!(cli_model_alias("claude-sonnet-4-20250514"), "sonnet");
        assert_eq!(cli_model_alias("claude-3-5-sonnet-20241022"), "sonnet");
        assert_eq!(cli_model_alias("claude-opus-4-20250514"), "opus");
        assert_eq!(cli_model_alias("claude-3-haiku-20240307"), "sonnet");
        assert_eq!(cli_model_alias("haiku"), "sonnet");
        assert_eq!(cli_model_alias("opus"), "opus");
        assert_eq!(cli_model_alias("unknown-model"), "sonnet");
    }

    #[test]
    fn test_build_prompt_flattens_text() {
        let messages = vec![
            Message::user_text("TASK: fix it"),
            Message::assistant(vec![ContentBlock::text("On it."), ContentBlock::text("Done.")]),
            Message::user(vec![ContentBlock::ToolResult {
                tool_use_id: "t".into(),
                content: "ignored".into(),
                is_error: false,
            }]),
        ];
        assert_eq!(
            build_prompt("SYSTEM", &messages),
            "SYSTEM\n\nUSER: TASK: fix it\n\nASSISTANT: On it. Done.\n\n"
        );
    }

    #[test]
    fn test_fold_prefers_result() {
        let mut fold = StreamFold::default();
        fold.push_line(r#"{"type":"assistant","message":{"content":[{"type":"text","text":"draft"}]}}"#);
        fold.push_line(r#"{"type":"result","subtype":"success","result":"final","usage":{"input_tokens":3,"output_tokens":1}}"#);
        let (text, usage) = fold.into_parts();
        assert_eq!(text, "final");
        assert_eq!(usage.input_tokens, 3);
    }

    #[test]
    fn test_fold_empty_result_keeps_assistant_text() {
        let mut fold = StreamFold::default();
        fold.push_line(r#"{"type":"assistant","message":{"content":[{"type":"text","text":"answer"}]}}"#);
        fold.push_line(r#"{"type":"result","subtype":"success","result":""}"#);
        assert_eq!(fold.into_parts().0, "answer");
    }

    #[test]
    fn test_fold_plain_text_fallback() {
        let mut fold = StreamFold::default();
        assert!(fold.push_line("not json").is_none());
        assert!(fold.push_line("").is_none());
        assert!(fold.push_line("42").is_none());
        let (text, usage) = fold.into_parts();
        assert_eq!(text, "not json\n42\n");
        assert_eq!(usage, Usage::default());
    }

    #[tokio::test]
    async fn test_send_runs_cli_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"pwd > "$(dirname "$0")/cwd.txt"
printf '%s\n' "$@" > "$(dirname "$0")/args.txt"
echo '{"type":"system","subtype":"init","session_id":"s1"}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"Working"}]}}'
echo 'plain progress line'
echo '{"type":"result","subtype":"success","result":"Final answer","is_error":false,"usage":{"input_tokens":5,"output_tokens":2}}'"#;
        let cli_path = write_script(dir.path(), body);

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let backend = CliBackend::connect(config(cli_path, dir.path()))
            .await
            .unwrap()
            .with_event_callback(Arc::new(move |_event: &Value| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));

        let resp = backend
            .send(&[Message::user_text("hello")], "SYS", 100, &[])
            .await
            .unwrap();
        assert_eq!(resp.text(), "Final answer");
        assert_eq!(resp.stop_reason, StopReason::EndTurn);
        assert_eq!(resp.usage.output_tokens, 2);
        assert_eq!(seen.load(Ordering::SeqCst), 3);

        let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
        let args: Vec<&str> = args.lines().collect();
        assert_eq!(
            &args[..7],
            &[
                "-p",
                "--verbose",
                "--output-format",
                "stream-json",
                "--model",
                "sonnet",
                "--dangerously-skip-permissions"
            ]
        );
        assert_eq!(args[7], "SYS");

        let cwd = std::fs::read_to_string(dir.path().join("cwd.txt")).unwrap();
        assert_eq!(
            std::fs::canonicalize(cwd.trim()).unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let cli_path = write_script(
            dir.path(),
            "echo 'partial output'\necho 'authentication expired' >&2\nexit 3",
        );
        let backend = CliBackend::connect(config(cli_path, dir.path())).await.unwrap();
        match backend.send(&[Message::user_text("hi")], "", 10, &[]).await {
            Err(BackendError::Process(msg)) => assert_eq!(msg, "authentication expired"),
            other => panic!("expected process failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_cli_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = CliBackend::connect(config(
            "/nonexistent/path/to/claude".into(),
            dir.path(),
        ))
        .await;
        assert!(matches!(result, Err(BackendError::Config(_))));
    }
}
