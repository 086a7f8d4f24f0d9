//! Configuration for the HIVE worker.
//!
//! Configuration is read from environment variables:
//! - `AGENT_ID` - Required. Worker identity (`WORKER_ID` is accepted as an alias).
//! - `WORKSPACE_DIR` - Optional. Workspace root for tools. Defaults to `/workspace`.
//! - `HIVE_STORE_URL` - Optional. `sqlite://<path>` or `memory://`. Defaults to `sqlite://hive.db`.
//! - `HIVE_KEY_PREFIX` - Optional. Namespace for store keys. Defaults to `hive`.
//! - `POLL_INTERVAL` - Optional. Seconds to sleep on an empty queue. Defaults to `1`.
//! - `ERROR_PAUSE` - Optional. Seconds to pause after a store failure. Defaults to `10`.
//! - `MAX_ITERATIONS` - Optional. Agent loop iteration budget. Defaults to `50`.
//! - `MAX_OUTPUT_TOKENS` - Optional. Output budget per model call. Defaults to `8000`.
//! - `BASH_TIMEOUT` - Optional. Default `bash` tool timeout in seconds. Defaults to `120`.
//! - `HIVE_PATH_POLICY` - Optional. `unrestricted` (default) or `workspace`.
//! - `AGENT_HOME` - Optional. `HOME` for commands run by the `bash` tool.
//!
//! Backend selection:
//! - `HIVE_CLAUDE_BACKEND` - Optional. Force `api`, `cli` or `bedrock`.
//! - `CLAUDE_MODEL` - Optional. Defaults to `claude-sonnet-4-20250514`.
//! - `ANTHROPIC_API_KEY`, `ANTHROPIC_BASE_URL` - Direct API access.
//! - `CLAUDE_CLI_PATH`, `CLAUDE_CODE_OAUTH_TOKEN` - Local CLI.
//! - `CLAUDE_CODE_USE_BEDROCK`, `AWS_PROFILE`, `AWS_REGION`,
//!   `AWS_ENDPOINT_URL_BEDROCK_RUNTIME`, `AWS_ACCESS_KEY_ID`,
//!   `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN`,
//!   `AWS_SHARED_CREDENTIALS_FILE` - Bedrock.
//!
//! Empty values are treated as unset.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::backend::anthropic::DEFAULT_API_BASE;
use crate::backend::BackendKind;
use crate::tools::PathPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// AWS settings for the Bedrock backend.
#[derive(Debug, Clone, PartialEq)]
pub struct AwsSettings {
    pub profile: Option<String>,
    pub region: String,
    /// Override for the Bedrock Runtime endpoint.
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Extra shared credentials file; the standard locations are always read.
    pub credentials_file: Option<PathBuf>,
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            profile: None,
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            credentials_file: None,
        }
    }
}

/// Inputs to backend selection and construction.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Explicit `HIVE_CLAUDE_BACKEND` choice.
    pub explicit: Option<BackendKind>,
    pub model: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: String,
    pub oauth_token: Option<String>,
    pub cli_path: String,
    pub use_bedrock: bool,
    pub aws: AwsSettings,
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub worker_id: String,
    pub workspace: PathBuf,
    pub store_url: String,
    pub key_prefix: String,
    pub poll_interval: Duration,
    pub error_pause: Duration,
    pub max_iterations: usize,
    pub max_output_tokens: u32,
    pub bash_timeout: Duration,
    pub path_policy: PathPolicy,
    pub agent_home: Option<PathBuf>,
    pub backend: BackendConfig,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key → value source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `AGENT_ID` is not set and
    /// `ConfigError::InvalidValue` for unparseable numbers or unknown names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let worker_id = get("AGENT_ID")
            .or_else(|| get("WORKER_ID"))
            .ok_or_else(|| ConfigError::MissingEnvVar("AGENT_ID".to_string()))?;

        let workspace = PathBuf::from(get("WORKSPACE_DIR").unwrap_or_else(|| "/workspace".to_string()));

        let path_policy = match get("HIVE_PATH_POLICY") {
            Some(v) => v
                .parse()
                .map_err(|e: String| ConfigError::InvalidValue("HIVE_PATH_POLICY".to_string(), e))?,
            None => PathPolicy::default(),
        };

        let explicit = match get("HIVE_CLAUDE_BACKEND") {
            Some(v) => Some(
                v.parse::<BackendKind>()
                    .map_err(|e| ConfigError::InvalidValue("HIVE_CLAUDE_BACKEND".to_string(), e))?,
            ),
            None => None,
        };

        let backend = BackendConfig {
            explicit,
            model: get("CLAUDE_MODEL").unwrap_or_else(|| "claude-sonnet-4-20250514".to_string()),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            anthropic_base_url: get("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            oauth_token: get("CLAUDE_CODE_OAUTH_TOKEN"),
            cli_path: get("CLAUDE_CLI_PATH").unwrap_or_else(|| "claude".to_string()),
            use_bedrock: get("CLAUDE_CODE_USE_BEDROCK").as_deref() == Some("1"),
            aws: AwsSettings {
                profile: get("AWS_PROFILE"),
                region: get("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                endpoint: get("AWS_ENDPOINT_URL_BEDROCK_RUNTIME"),
                access_key_id: get("AWS_ACCESS_KEY_ID"),
                secret_access_key: get("AWS_SECRET_ACCESS_KEY"),
                session_token: get("AWS_SESSION_TOKEN"),
                credentials_file: get("AWS_SHARED_CREDENTIALS_FILE").map(PathBuf::from),
            },
        };

        Ok(Self {
            worker_id,
            workspace,
            store_url: get("HIVE_STORE_URL").unwrap_or_else(|| "sqlite://hive.db".to_string()),
            key_prefix: get("HIVE_KEY_PREFIX").unwrap_or_else(|| "hive".to_string()),
            poll_interval: parse_seconds("POLL_INTERVAL", get("POLL_INTERVAL"), 1.0)?,
            error_pause: parse_seconds("ERROR_PAUSE", get("ERROR_PAUSE"), 10.0)?,
            max_iterations: parse_number("MAX_ITERATIONS", get("MAX_ITERATIONS"), 50)?,
            max_output_tokens: parse_number("MAX_OUTPUT_TOKENS", get("MAX_OUTPUT_TOKENS"), 8000)?,
            bash_timeout: parse_seconds("BASH_TIMEOUT", get("BASH_TIMEOUT"), 120.0)?,
            path_policy,
            agent_home: get("AGENT_HOME").map(PathBuf::from),
            backend,
        })
    }
}

fn parse_number<T>(key: &str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let Some(raw) = value else {
        return Ok(default);
    };
    let parsed: T = raw
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue(key.to_string(), format!("{}", e)))?;
    if parsed <= T::default() {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(parsed)
}

fn parse_seconds(key: &str, value: Option<String>, default: f64) -> Result<Duration, ConfigError> {
    let secs = match value {
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{}", e)))?,
        None => default,
    };
    if !secs.is_finite() || secs < 0.0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("{} is not a non-negative number of seconds", secs),
        ));
    }
    Ok(Duration::from_secs_f64(secs))
}
