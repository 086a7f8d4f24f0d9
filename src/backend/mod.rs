//! Language-model backends.
//!
//! Every backend takes a conversation, a system prompt, an output budget and
//! the advertised tools, and returns content blocks plus a normalized stop
//! reason. Three transports implement it:
//!
//! - [`anthropic`]: one HTTPS request per call against the Messages API
//! - [`cli`]: one `claude` subprocess per call, folding its NDJSON stream
//! - [`bedrock`]: one SigV4-signed `invoke` call against Bedrock Runtime

pub mod anthropic;
pub mod bedrock;
pub mod cli;
pub mod events;
#[cfg(test)]
mod fake_http;
#[cfg(test)]
pub mod scripted;
mod wire;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::BackendConfig;

pub use cli::EventCallback;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Parse raw API content blocks, dropping kinds this crate does not model
/// (thinking, images, server tools).
pub fn parse_content_blocks(raw: Vec<Value>) -> Vec<ContentBlock> {
    raw.into_iter()
        .filter_map(|v| match serde_json::from_value::<ContentBlock>(v.clone()) {
            Ok(block) => Some(block),
            Err(_) => {
                debug!(
                    "Skipping unsupported content block type: {}",
                    v.get("type").and_then(serde_json::Value::as_str).unwrap_or("<none>")
                );
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Text blocks joined by a space.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    /// Anything else the transport reported (`max_tokens`, `stop_sequence`, ...).
    Other(String),
}

impl StopReason {
    /// Normalize a transport's raw stop reason against the returned content.
    ///
    /// `end_turn` and `tool_use` are decided by whether any `tool_use` block is
    /// present, so a backend can never report a finished turn that still has
    /// pending calls. Other raw values pass through as [`StopReason::Other`].
    pub fn normalize(raw: Option<&str>, content: &[ContentBlock]) -> Self {
        let has_tool_use = content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }));
        match raw {
            Some("end_turn") | Some("tool_use") if has_tool_use => StopReason::ToolUse,
            Some("end_turn") | Some("tool_use") => StopReason::EndTurn,
            Some(other) => StopReason::Other(other.to_string()),
            None => StopReason::Other("none".to_string()),
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EndTurn => write!(f, "end_turn"),
            StopReason::ToolUse => write!(f, "tool_use"),
            StopReason::Other(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl Usage {
    pub fn add(&self, other: &Usage) -> Usage {
        Usage {
            input_tokens: self.input_tokens.saturating_add(other.input_tokens),
            output_tokens: self.output_tokens.saturating_add(other.output_tokens),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

impl BackendResponse {
    /// All text blocks concatenated, in order.
    pub fn text(&self) -> String {
        self.content.iter().filter_map(ContentBlock::as_text).collect()
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("Claude CLI failed: {0}")]
    Process(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;

    /// Send the whole conversation and return the model's next turn.
    async fn send(
        &self,
        messages: &[Message],
        system: &str,
        max_tokens: u32,
        tools: &[ToolSpec],
    ) -> Result<BackendResponse, BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Api,
    Cli,
    Bedrock,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "api" | "anthropic" => Ok(BackendKind::Api),
            "cli" | "claude-cli" => Ok(BackendKind::Cli),
            "bedrock" => Ok(BackendKind::Bedrock),
            other => Err(format!("unknown backend '{}' (expected api, cli or bedrock)", other)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Api => write!(f, "api"),
            BackendKind::Cli => write!(f, "cli"),
            BackendKind::Bedrock => write!(f, "bedrock"),
        }
    }
}

/// Pick a backend: explicit choice, then a direct API key, then a
/// managed-cloud signal, then the locally authenticated CLI.
pub fn select_backend(config: &BackendConfig) -> Result<BackendKind, BackendError> {
    if let Some(kind) = config.explicit {
        if kind == BackendKind::Api && config.anthropic_api_key.is_none() {
            return Err(BackendError::Config(
                "HIVE_CLAUDE_BACKEND=api requires ANTHROPIC_API_KEY".to_string(),
            ));
        }
        return Ok(kind);
    }
    if config.anthropic_api_key.is_some() {
        return Ok(BackendKind::Api);
    }
    if config.use_bedrock || config.aws.profile.is_some() {
        return Ok(BackendKind::Bedrock);
    }
    Ok(BackendKind::Cli)
}

/// Build the selected backend. Any error here means the worker must not start.
pub async fn create_backend(
    config: &BackendConfig,
    workspace: &Path,
    on_cli_event: Option<EventCallback>,
) -> Result<Arc<dyn Backend>, BackendError> {
    let kind = select_backend(config)?;
    info!("Using {} backend with model {}", kind, config.model);

    let backend: Arc<dyn Backend> = match kind {
        BackendKind::Api => {
            let key = config.anthropic_api_key.clone().ok_or_else(|| {
                BackendError::Config("ANTHROPIC_API_KEY is not set".to_string())
            })?;
            Arc::new(anthropic::AnthropicBackend::with_base_url(
                key,
                config.anthropic_base_url.clone(),
                config.model.clone(),
            )?)
        }
        BackendKind::Bedrock => Arc::new(bedrock::BedrockBackend::from_config(config).await?),
        BackendKind::Cli => {
            let mut backend = cli::CliBackend::connect(cli::CliConfig {
                cli_path: config.cli_path.clone(),
                model: config.model.clone(),
                workspace: workspace.to_path_buf(),
                oauth_token: config.oauth_token.clone(),
            })
            .await?;
            if let Some(callback) = on_cli_event {
                backend = backend.with_event_callback(callback);
            }
            Arc::new(backend)
        }
    };
    Ok(backend)
}
