//! Backend replaying canned responses and recording what it was sent.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{Backend, BackendError, BackendResponse, ContentBlock, Message, StopReason, ToolSpec, Usage};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub system: String,
    pub max_tokens: u32,
    pub tool_names: Vec<String>,
}

pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<BackendResponse, String>>>,
    repeat: Option<BackendResponse>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<BackendResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().map(Ok).collect()),
            repeat: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with the same response.
    pub fn repeating(response: BackendResponse) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            repeat: Some(response),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a transport failure.
    pub fn then_fail(self, message: &str) -> Self {
        self.script.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn id(&self) -> &str {
        "scripted"
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    async fn send(
        &self,
        messages: &[Message],
        system: &str,
        max_tokens: u32,
        tools: &[ToolSpec],
    ) -> Result<BackendResponse, BackendError> {
        self.calls.lock().unwrap().push(RecordedCall {
            messages: messages.to_vec(),
            system: system.to_string(),
            max_tokens,
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
        });
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(resp)) => Ok(resp),
            Some(Err(msg)) => Err(BackendError::Api {
                status: 500,
                message: msg,
            }),
            None => self
                .repeat
                .clone()
                .ok_or_else(|| BackendError::InvalidResponse("script exhausted".to_string())),
        }
    }
}

pub fn end_turn(text: &str) -> BackendResponse {
    BackendResponse {
        content: vec![ContentBlock::text(text)],
        stop_reason: StopReason::EndTurn,
        usage: Usage {
            input_tokens: 10,
            output_tokens: 5,
        },
    }
}

/// A tool-use turn calling each `(id, tool, input)` in order.
pub fn tool_use(calls: &[(&str, &str, Value)]) -> BackendResponse {
    BackendResponse {
        content: calls
            .iter()
            .map(|(id, name, input)| ContentBlock::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input: input.clone(),
            })
            .collect(),
        stop_reason: StopReason::ToolUse,
        usage: Usage {
            input_tokens: 10,
            output_tokens: 5,
        },
    }
}
