//! Messages API request/response bodies, shared by the direct and Bedrock transports.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    parse_content_blocks, BackendError, BackendResponse, Message, StopReason, ToolSpec, Usage,
};

#[derive(Debug, Serialize)]
pub(crate) struct RequestBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anthropic_version: Option<&'a str>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub system: &'a str,
    pub messages: &'a [Message],
    #[serde(skip_serializing_if = "<[ToolSpec]>::is_empty")]
    pub tools: &'a [ToolSpec],
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    #[serde(default)]
    content: Vec<Value>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

/// Map a successful response body into the normalized shape.
pub(crate) fn parse_response(body: &[u8]) -> Result<BackendResponse, BackendError> {
    let parsed: ResponseBody = serde_json::from_slice(body)
        .map_err(|e| BackendError::InvalidResponse(format!("unparseable body: {}", e)))?;
    let content = parse_content_blocks(parsed.content);
    let stop_reason = StopReason::normalize(parsed.stop_reason.as_deref(), &content);
    Ok(BackendResponse {
        content,
        stop_reason,
        usage: parsed.usage.unwrap_or_default(),
    })
}

/// Best-effort message from an error body: `{"error":{"message"}}`,
/// `{"message"}`, or the raw text.
pub(crate) fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let nested = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str);
        let flat = value.get("message").and_then(Value::as_str);
        if let Some(msg) = nested.or(flat) {
            return msg.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        trimmed.chars().take(500).collect()
    }
}
