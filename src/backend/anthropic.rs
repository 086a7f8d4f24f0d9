//! Direct Anthropic Messages API backend.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::wire::{self, RequestBody};
use super::{Backend, BackendError, BackendResponse, Message, ToolSpec};

/// Default Anthropic API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.anthropic.com";

/// Anthropic API version header value.
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicBackend {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl AnthropicBackend {
    pub fn new(api_key: String, model: String) -> Result<Self, BackendError> {
        Self::with_base_url(api_key, DEFAULT_API_BASE.to_string(), model)
    }

    pub fn with_base_url(
        api_key: String,
        api_base: String,
        model: String,
    ) -> Result<Self, BackendError> {
        if api_key.trim().is_empty() {
            return Err(BackendError::Config("Anthropic API key is empty".to_string()));
        }
        Ok(Self {
            client: Client::builder().build()?,
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            model,
        })
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    fn id(&self) -> &str {
        "api"
    }

    fn name(&self) -> &str {
        "Anthropic API"
    }

    async fn send(
        &self,
        messages: &[Message],
        system: &str,
        max_tokens: u32,
        tools: &[ToolSpec],
    ) -> Result<BackendResponse, BackendError> {
        let body = RequestBody {
            model: Some(&self.model),
            anthropic_version: None,
            max_tokens,
            system,
            messages,
            tools,
        };

        let url = format!("{}/v1/messages", self.api_base);
        debug!("POST {} ({} messages)", url, messages.len());

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(BackendError::Api {
                status: status.as_u16(),
                message: wire::error_message(&String::from_utf8_lossy(&bytes)),
            });
        }
        wire::parse_response(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake_http::serve_once;
    use crate::backend::StopReason;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_maps_response() {
        let reply = json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "All done."}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 3}
        });
        let (base, server) = serve_once(200, &reply.to_string()).await;
        let backend =
            AnthropicBackend::with_base_url("sk-test".into(), base, "claude-test".into()).unwrap();

        let tools = vec![ToolSpec {
            name: "read".into(),
            description: "Read a file".into(),
            input_schema: json!({"type": "object"}),
        }];
        let resp = backend
            .send(&[Message::user_text("hello")], "be brief", 512, &tools)
            .await
            .unwrap();
        assert_eq!(resp.text(), "All done.");
        assert_eq!(resp.stop_reason, StopReason::EndTurn);
        assert_eq!(resp.usage.output_tokens, 3);

        let req = server.await.unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/v1/messages");
        assert_eq!(req.headers.get("x-api-key").map(String::as_str), Some("sk-test"));
        assert_eq!(
            req.headers.get("anthropic-version").map(String::as_str),
            Some("2023-06-01")
        );
        let sent = req.json();
        assert_eq!(sent["model"], "claude-test");
        assert_eq!(sent["system"], "be brief");
        assert_eq!(sent["max_tokens"], 512);
        assert_eq!(sent["tools"][0]["name"], "read");
    }

    #[tokio::test]
    async fn test_api_error_is_reported() {
        let (base, _server) = serve_once(
            529,
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        )
        .await;
        let backend =
            AnthropicBackend::with_base_url("sk-test".into(), base, "claude-test".into()).unwrap();
        match backend.send(&[Message::user_text("hi")], "", 10, &[]).await {
            Err(BackendError::Api { status, message }) => {
                assert_eq!(status, 529);
                assert_eq!(message, "Overloaded");
            }
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(AnthropicBackend::new("  ".into(), "m".into()).is_err());
    }
}
