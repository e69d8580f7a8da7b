use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of an assistant message's `tool_calls` array.
///
/// `arguments` is a JSON document in string form, exactly as the model emits
/// it; parsing is deferred to the dispatcher so malformed output can be
/// reported back to the model instead of failing the turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function: ToolCallFunction,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    pub arguments: String,
}

/// A single conversation message in the wire shape the backend consumes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// Tool advertised to the backend for a completion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
}

/// Per-completion token and timing counters reported by the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionTimings {
    pub prompt_n: i64,
    pub predicted_n: i64,
    pub cached_n: i64,
    pub prompt_ms: f64,
    pub predicted_ms: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Completion {
    pub message: ChatMessage,
    pub timings: CompletionTimings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_roundtrip_preserves_tool_calls() {
        let message = ChatMessage::assistant_with_calls(
            "",
            vec![ToolCall {
                id: "call_1".to_string(),
                function: ToolCallFunction {
                    name: "bash".to_string(),
                    arguments: r#"{"command":"ls"}"#.to_string(),
                },
            }],
        );

        let raw = serde_json::to_string(&message).expect("message should serialize");
        let parsed: ChatMessage = serde_json::from_str(&raw).expect("message should parse");
        assert_eq!(parsed, message);
    }

    #[test]
    fn plain_messages_omit_tool_fields_on_the_wire() {
        let raw = serde_json::to_value(ChatMessage::user("hi")).expect("message should serialize");
        assert_eq!(raw.get("tool_calls"), None);
        assert_eq!(raw.get("tool_call_id"), None);
        assert_eq!(raw["role"], "user");
    }

    #[test]
    fn tool_result_carries_call_id() {
        let message = ChatMessage::tool_result("call_9", "done");
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("call_9"));
    }
}
