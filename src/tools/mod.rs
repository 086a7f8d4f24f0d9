//! Tool system for the agent.
//!
//! Tools are what the model acts through: file access, shell commands, code
//! search, and HIVE coordination.
//!
//! ## Workspace-First Design
//!
//! Tools work **relative to the workspace** by default:
//! - Relative paths (e.g., `src/lib.rs`) resolve from the workspace directory
//! - Absolute paths (e.g., `/etc/hosts`) are used verbatim
//!
//! Whether an absolute path (or a `..` walk) may leave the workspace is decided
//! by the [`PathPolicy`] in the [`ToolContext`]. `Unrestricted` is the default.
//!
//! Every tool returns a [`ToolOutput`] or a [`ToolError`]; the registry never
//! surfaces any other failure to the agent loop.

pub mod file_ops;
pub mod hive;
pub mod search;
pub mod terminal;

pub use file_ops::{EditFile, ReadFile, WriteFile};
pub use hive::Coordination;
pub use search::{GlobFiles, GrepSearch};
pub use terminal::RunCommand;

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::backend::ToolSpec;
use crate::task::TaskError;

// ============================================================================
// Path Resolution Utilities
// ============================================================================

/// Result of resolving a path relative to the workspace.
#[derive(Debug, Clone)]
pub struct PathResolution {
    /// The original path string provided by the agent.
    pub original: String,
    /// The absolute path with `.` and `..` folded away.
    pub resolved: PathBuf,
    /// Whether the resolved path (after following symlinks) is outside the workspace.
    pub is_outside_workspace: bool,
    /// Whether the original path was absolute.
    pub was_absolute: bool,
}

/// Resolve a path relative to the workspace.
///
/// - Relative paths are joined with `workspace`
/// - Absolute paths are used as-is
///
/// Containment is checked on canonical paths. For paths that do not exist yet
/// the deepest existing ancestor is canonicalized and the rest appended.
pub fn resolve_path(path_str: &str, workspace: &Path) -> PathResolution {
    let path = Path::new(path_str);
    let was_absolute = path.is_absolute();

    let joined = if was_absolute {
        path.to_path_buf()
    } else {
        workspace.join(path)
    };
    let resolved = normalize(&joined);

    let canonical_resolved = canonicalize_lenient(&resolved);
    let canonical_workspace = canonicalize_lenient(&normalize(workspace));
    let is_outside_workspace = !canonical_resolved.starts_with(&canonical_workspace);

    PathResolution {
        original: path_str.to_string(),
        resolved,
        is_outside_workspace,
        was_absolute,
    }
}

/// Fold `.` and `..` lexically.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn canonicalize_lenient(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut rest = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for part in rest.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (existing.file_name().map(|n| n.to_os_string()), existing.parent()) {
            (Some(name), Some(parent)) => {
                rest.push(name);
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
}

/// Where tools may touch the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathPolicy {
    /// Any path is allowed; absolute paths escape the workspace.
    #[default]
    Unrestricted,
    /// Resolved paths must stay inside the workspace.
    WorkspaceOnly,
}

impl FromStr for PathPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unrestricted" => Ok(Self::Unrestricted),
            "workspace" | "workspace-only" | "workspace_only" => Ok(Self::WorkspaceOnly),
            other => Err(format!(
                "unknown path policy '{}' (expected 'unrestricted' or 'workspace')",
                other
            )),
        }
    }
}

impl fmt::Display for PathPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unrestricted => write!(f, "unrestricted"),
            Self::WorkspaceOnly => write!(f, "workspace"),
        }
    }
}

/// What every tool call gets to see besides its arguments.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub workspace: PathBuf,
    pub path_policy: PathPolicy,
    /// Used by `bash` when the call gives no timeout.
    pub default_bash_timeout: Duration,
    /// `HOME` for shell commands.
    pub shell_home: Option<PathBuf>,
}

impl ToolContext {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            path_policy: PathPolicy::default(),
            default_bash_timeout: Duration::from_secs(120),
            shell_home: None,
        }
    }

    pub fn with_path_policy(mut self, policy: PathPolicy) -> Self {
        self.path_policy = policy;
        self
    }

    pub fn with_bash_timeout(mut self, timeout: Duration) -> Self {
        self.default_bash_timeout = timeout;
        self
    }

    pub fn with_shell_home(mut self, home: Option<PathBuf>) -> Self {
        self.shell_home = home;
        self
    }

    /// Resolve a tool path and apply the path policy.
    pub fn resolve(&self, path_str: &str) -> Result<PathResolution, ToolError> {
        let resolution = resolve_path(path_str, &self.workspace);
        if self.path_policy == PathPolicy::WorkspaceOnly && resolution.is_outside_workspace {
            return Err(ToolError::new(format!(
                "Path outside workspace: {} (resolved to: {})",
                path_str,
                resolution.resolved.display()
            )));
        }
        Ok(resolution)
    }

    /// Path for tool output: workspace-relative when possible.
    pub fn display_path(&self, path: &Path) -> String {
        match path.strip_prefix(&self.workspace) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.display().to_string(),
            Ok(_) => ".".to_string(),
            Err(_) => path.display().to_string(),
        }
    }
}

// ============================================================================
// Tool Trait and Registry
// ============================================================================

/// Success value of a tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Text(String),
    Object(Map<String, Value>),
    List(Vec<Value>),
}

impl ToolOutput {
    /// Wrap a JSON value: objects and arrays keep their shape, anything else
    /// becomes text.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Object(map),
            Value::Array(items) => Self::List(items),
            Value::String(text) => Self::Text(text),
            other => Self::Text(other.to_string()),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::Object(map) => Value::Object(map.clone()),
            Self::List(items) => Value::Array(items.clone()),
        }
    }
}

/// The one failure kind a tool may raise.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ToolError {
    pub message: String,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn missing_arg(name: &str) -> Self {
        Self::new(format!("Missing '{}' argument", name))
    }
}

impl From<TaskError> for ToolError {
    fn from(e: TaskError) -> Self {
        Self::new(e.to_string())
    }
}

pub(crate) fn required_str<'a>(args: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::missing_arg(name))
}

pub(crate) fn optional_str<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str).filter(|s| !s.is_empty())
}

pub(crate) fn optional_u64(args: &Value, name: &str) -> Result<Option<u64>, ToolError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(Some)
            .ok_or_else(|| ToolError::new(format!("'{}' must be a non-negative number", name))),
    }
}

pub(crate) fn optional_bool(args: &Value, name: &str) -> bool {
    args.get(name).and_then(Value::as_bool).unwrap_or(false)
}

/// Information about a tool for display purposes.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// Trait for implementing tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;
}

/// Registry of available tools, in registration order.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// All development tools plus the HIVE coordination tools.
    pub fn new(coordination: Coordination) -> Self {
        let mut registry = Self::primitives();
        for tool in hive::tools(coordination) {
            registry.register(tool);
        }
        tracing::debug!("Tool registry ready with {} tools", registry.tools.len());
        registry
    }

    /// File, shell, and search tools only.
    pub fn primitives() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ReadFile));
        registry.register(Arc::new(EditFile));
        registry.register(Arc::new(WriteFile));
        registry.register(Arc::new(RunCommand));
        registry.register(Arc::new(GrepSearch));
        registry.register(Arc::new(GlobFiles));
        registry
    }

    /// Create an empty registry (no built-in tools).
    pub fn empty() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Add a tool, replacing any tool with the same name in place.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&i) => self.tools[i] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// List all available tools.
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect()
    }

    /// Tool definitions advertised to the model.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.parameters_schema(),
            })
            .collect()
    }

    /// Execute a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| ToolError::new(format!("Unknown tool: {}", name)))?;

        tool.execute(args, ctx).await
    }
}
