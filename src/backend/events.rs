//! Events emitted by the Claude CLI in `--output-format stream-json` mode.
//!
//! Only the fields the fold needs are modelled; anything else in an event is
//! ignored, and unknown event types deserialize to [`CliEvent::Other`].

use serde::Deserialize;
use serde_json::Value;

use super::Usage;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum CliEvent {
    #[serde(rename = "assistant")]
    Assistant(AssistantEvent),
    #[serde(rename = "result")]
    Result(ResultEvent),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantEvent {
    pub message: AssistantMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    /// Raw blocks; the CLI also emits `thinking` and its own `tool_use` blocks.
    #[serde(default)]
    pub content: Vec<Value>,
}

impl AssistantMessage {
    /// Text of each `text` block, in order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|block| {
            if block.get("type").and_then(Value::as_str) == Some("text") {
                block.get("text").and_then(Value::as_str)
            } else {
                None
            }
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultEvent {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_and_user_events_are_other() {
        let system = r#"{"type":"system","subtype":"init","cwd":"/tmp","session_id":"abc123","tools":["Bash","Read"]}"#;
        let user = r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t","content":"ok"}]}}"#;
        for json in [system, user] {
            assert!(matches!(
                serde_json::from_str::<CliEvent>(json).unwrap(),
                CliEvent::Other
            ));
        }
    }

    #[test]
    fn test_parse_assistant_texts() {
        let json = r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"..."},{"type":"text","text":"Hello"},{"type":"tool_use","id":"toolu_1","name":"Bash","input":{}}],"stop_reason":"tool_use"},"session_id":"abc123"}"#;
        match serde_json::from_str::<CliEvent>(json).unwrap() {
            CliEvent::Assistant(evt) => {
                assert_eq!(evt.message.texts().collect::<Vec<_>>(), vec!["Hello"]);
            }
            other => panic!("Expected Assistant event, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_result_event() {
        let json = r#"{"type":"result","subtype":"success","result":"Done","session_id":"abc123","is_error":false,"total_cost_usd":0.05,"usage":{"input_tokens":100,"output_tokens":20,"cache_read_input_tokens":5}}"#;
        match serde_json::from_str::<CliEvent>(json).unwrap() {
            CliEvent::Result(res) => {
                assert_eq!(res.result.as_deref(), Some("Done"));
                assert!(!res.is_error);
                assert_eq!(res.usage.unwrap().input_tokens, 100);
            }
            other => panic!("Expected Result event, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_type() {
        let json = r#"{"type":"stream_event","event":{"type":"message_stop"}}"#;
        assert!(matches!(
            serde_json::from_str::<CliEvent>(json).unwrap(),
            CliEvent::Other
        ));
    }
}
