//! Conversation history types shared by the orchestrator and LLM client.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A call the LLM asked the orchestrator to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One entry in a session's conversation history.
///
/// An assistant entry carries either `content` or a non-empty `tool_calls`
/// list, never both (invariant 3 of the data model: for every assistant
/// message with `k` tool calls, the next `k` history entries are tool
/// messages answering exactly those calls, in order).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tool_calls: Vec<ToolCall>,
    /// Present only on `Role::Tool` messages: the id of the call answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(result.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    /// True when this is a final assistant text reply (no tool calls).
    pub fn is_final_text(&self) -> bool {
        self.role == Role::Assistant && self.tool_calls.is_empty()
    }
}

/// How a tool is executed once the LLM has asked for it.
#[derive(Debug, Clone)]
pub enum ToolHandler {
    /// Customer-supplied function-expression source, run in the sandbox.
    Sandboxed { source: String },
    /// Executed directly by the host (e.g. `web_search`).
    BuiltIn,
}

#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub handler: ToolHandler,
}

impl ToolDefinition {
    /// The `{type: "function", function: {...}}` envelope the LLM client
    /// sends upstream.
    pub fn to_schema_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_text_is_final() {
        let m = ChatMessage::assistant_text("hi");
        assert!(m.is_final_text());
    }

    #[test]
    fn assistant_tool_calls_is_not_final() {
        let m = ChatMessage::assistant_tool_calls(vec![ToolCall {
            id: "1".into(),
            name: "get_weather".into(),
            arguments: serde_json::json!({}),
        }]);
        assert!(!m.is_final_text());
    }

    #[test]
    fn tool_result_carries_call_id() {
        let m = ChatMessage::tool_result("call_1", "20C sunny");
        assert_eq!(m.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(m.content.as_deref(), Some("20C sunny"));
    }
}
