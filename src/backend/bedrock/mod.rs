//! Amazon Bedrock backend (Anthropic models via `InvokeModel`).

pub mod credentials;
pub mod signing;

use std::time::SystemTime;

use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use reqwest::{Client, Url};
use tracing::debug;

use super::wire::{self, RequestBody};
use super::{Backend, BackendError, BackendResponse, Message, ToolSpec};
use crate::config::BackendConfig;

/// Messages API version string Bedrock expects inside the body.
pub const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

const SIGNING_SERVICE: &str = "bedrock";

const DEFAULT_MODEL_ID: &str = "anthropic.claude-3-5-sonnet-20241022-v2:0";

/// Map an Anthropic model name to its Bedrock model id.
pub fn bedrock_model_id(model: &str) -> String {
    if model.starts_with("anthropic.") || model.contains(".anthropic.") {
        return model.to_string();
    }
    match model {
        "claude-sonnet-4-20250514" => "anthropic.claude-3-5-sonnet-20241022-v2:0",
        "claude-opus-4-20250514" => "anthropic.claude-opus-4-20250514-v1:0",
        "claude-3-5-sonnet-20241022" => "anthropic.claude-3-5-sonnet-20241022-v2:0",
        "claude-3-opus-20240229" => "anthropic.claude-3-opus-20240229-v1:0",
        _ => DEFAULT_MODEL_ID,
    }
    .to_string()
}

pub struct BedrockBackend {
    client: Client,
    endpoint: Url,
    region: String,
    model_id: String,
    credentials: SharedCredentialsProvider,
}

impl BedrockBackend {
    /// Build from configuration. Credentials are resolved once here so a
    /// worker without usable AWS credentials never starts.
    pub async fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        let provider = credentials::provider(&config.aws).await?;
        credentials::resolve(&provider, config.aws.profile.as_deref()).await?;

        let region = config.aws.region.clone();
        let endpoint = config
            .aws
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://bedrock-runtime.{}.amazonaws.com", region));
        Self::new(&endpoint, region, bedrock_model_id(&config.model), provider)
    }

    pub fn new(
        endpoint: &str,
        region: String,
        model_id: String,
        credentials: SharedCredentialsProvider,
    ) -> Result<Self, BackendError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| BackendError::Config(format!("invalid Bedrock endpoint '{}': {}", endpoint, e)))?;
        if endpoint.host_str().is_none() {
            return Err(BackendError::Config(format!(
                "Bedrock endpoint '{}' has no host",
                endpoint
            )));
        }
        Ok(Self {
            client: Client::builder().build()?,
            endpoint,
            region,
            model_id,
            credentials,
        })
    }

    fn invoke_url(&self) -> String {
        format!(
            "{}/model/{}/invoke",
            self.endpoint.as_str().trim_end_matches('/'),
            urlencoding::encode(&self.model_id)
        )
    }
}

#[async_trait]
impl Backend for BedrockBackend {
    fn id(&self) -> &str {
        "bedrock"
    }

    fn name(&self) -> &str {
        "Amazon Bedrock"
    }

    async fn send(
        &self,
        messages: &[Message],
        system: &str,
        max_tokens: u32,
        tools: &[ToolSpec],
    ) -> Result<BackendResponse, BackendError> {
        let body = serde_json::to_vec(&RequestBody {
            model: None,
            anthropic_version: Some(BEDROCK_ANTHROPIC_VERSION),
            max_tokens,
            system,
            messages,
            tools,
        })
        .map_err(|e| BackendError::InvalidResponse(format!("failed to encode request: {}", e)))?;

        // Temporary credentials are refreshed by the provider between calls.
        let creds = self
            .credentials
            .provide_credentials()
            .await
            .map_err(|e| BackendError::Config(format!("AWS credentials unavailable: {}", e)))?;

        let url = self.invoke_url();
        let signed = signing::sign_request(
            "POST",
            &url,
            &body,
            &creds,
            &self.region,
            SIGNING_SERVICE,
            SystemTime::now(),
        )?;
        debug!("POST {} ({} messages)", url, messages.len());

        let mut request = self.client.post(&url).header("accept", "application/json");
        for (name, value) in signing::SIGNED_HEADERS.iter() {
            request = request.header(*name, *value);
        }
        for (name, value) in &signed {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.body(body).send().await?;

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
    use aws_credential_types::Credentials;
    use chrono::NaiveDateTime;
    use serde_json::json;

    fn creds() -> Credentials {
        Credentials::new(
            "AKIDEXAMPLE",
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            Some("session".into()),
            None,
            "test",
        )
    }

    fn provider() -> SharedCredentialsProvider {
        SharedCredentialsProvider::new(creds())
    }

    #[test]
    fn test_model_id_mapping() {
        assert_eq!(
            bedrock_model_id("claude-opus-4-20250514"),
            "anthropic.claude-opus-4-20250514-v1:0"
        );
        assert_eq!(
            bedrock_model_id("claude-sonnet-4-20250514"),
            "anthropic.claude-3-5-sonnet-20241022-v2:0"
        );
        assert_eq!(bedrock_model_id("something-else"), DEFAULT_MODEL_ID);
        assert_eq!(
            bedrock_model_id("us.anthropic.claude-3-7-sonnet-20250219-v1:0"),
            "us.anthropic.claude-3-7-sonnet-20250219-v1:0"
        );
    }

    #[tokio::test]
    async fn test_send_signs_and_maps_response() {
        let reply = json!({
            "content": [
                {"type": "tool_use", "id": "toolu_9", "name": "glob", "input": {"pattern": "*.rs"}}
            ],
            "stop_reason": "tool_use"
        });
        let (base, server) = serve_once(200, &reply.to_string()).await;
        let backend = BedrockBackend::new(
            &base,
            "us-west-2".into(),
            bedrock_model_id("claude-3-5-sonnet-20241022"),
            provider(),
        )
        .unwrap();

        let resp = backend
            .send(&[Message::user_text("list files")], "sys", 1000, &[])
            .await
            .unwrap();
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
        assert_eq!(resp.usage.input_tokens, 0);

        let req = server.await.unwrap();
        assert_eq!(
            req.path,
            "/model/anthropic.claude-3-5-sonnet-20241022-v2%3A0/invoke"
        );
        let sent = req.json();
        assert_eq!(sent["anthropic_version"], "bedrock-2023-05-31");
        assert!(sent.get("model").is_none());
        assert_eq!(sent["max_tokens"], 1000);
        assert_eq!(req.headers.get("x-amz-security-token").map(String::as_str), Some("session"));

        // Re-sign what the server saw at the time the request carried.
        let amz_date = req.headers.get("x-amz-date").unwrap();
        let when = NaiveDateTime::parse_from_str(amz_date, "%Y%m%dT%H%M%SZ")
            .unwrap()
            .and_utc();
        let expected = signing::sign_request(
            "POST",
            &format!("{}{}", base, req.path),
            &req.body,
            &creds(),
            "us-west-2",
            "bedrock",
            SystemTime::from(when),
        )
        .unwrap();
        let expected_auth = expected
            .iter()
            .find(|(name, _)| name == "authorization")
            .map(|(_, value)| value.clone());
        assert_eq!(req.headers.get("authorization").cloned(), expected_auth);
        assert!(req.headers["authorization"].contains("/us-west-2/bedrock/aws4_request"));
    }

    #[tokio::test]
    async fn test_error_body_message() {
        let (base, _server) = serve_once(403, r#"{"message":"The security token included in the request is invalid."}"#).await;
        let backend = BedrockBackend::new(&base, "us-east-1".into(), DEFAULT_MODEL_ID.into(), provider()).unwrap();
        match backend.send(&[Message::user_text("hi")], "", 10, &[]).await {
            Err(BackendError::Api { status, message }) => {
                assert_eq!(status, 403);
                assert!(message.contains("security token"));
            }
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(matches!(
            BedrockBackend::new("not a url", "us-east-1".into(), DEFAULT_MODEL_ID.into(), provider()),
            Err(BackendError::Config(_))
        ));
    }
}
