//! Chat messages and the model collaborator contract.
//!
//! Messages use the OpenAI-style chat shape (`role`, `content`,
//! `tool_calls`, `tool_call_id`). Model replies arrive as raw JSON so that
//! [`parse_reply`] can accept both the chat shape and the older
//! `{type: "message" | "tool_call", ...}` shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::protocol::ToolDefinition;

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// The human.
    User,
    /// The model.
    Assistant,
    /// A tool result.
    Tool,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author.
    pub role: Role,
    /// Text content.
    #[serde(default)]
    pub content: Option<String>,
    /// Tool calls requested by an assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    /// Call answered by a tool message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name of a tool message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn new(role: Role, content: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// User message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, Some(content.into()))
    }

    /// Plain assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, Some(content.into()))
    }

    /// Assistant message requesting tool calls.
    pub fn assistant_with_calls(content: Option<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::new(Role::Assistant, content)
        }
    }

    /// Result of one tool call.
    pub fn tool(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            name: Some(name.into()),
            ..Self::new(Role::Tool, Some(content.into()))
        }
    }

    /// Requested tool calls, empty for anything but a calling assistant message.
    pub fn calls(&self) -> &[ToolCallRequest] {
        self.tool_calls.as_deref().unwrap_or_default()
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Correlation id echoed by the tool message.
    pub id: String,
    /// Always "function".
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    /// Function name and arguments.
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".into()
}

/// Function name and JSON-encoded arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Tool name.
    pub name: String,
    /// Arguments as a JSON string.
    #[serde(default)]
    pub arguments: String,
}

impl ToolCallRequest {
    /// Build a call from structured arguments.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: &Value) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.to_string(),
            },
        }
    }

    /// Tool name.
    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Decode the argument string. Blank means no arguments.
    pub fn parse_arguments(&self) -> Result<Value> {
        let raw = self.function.arguments.trim();
        if raw.is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(raw).map_err(|e| {
            Error::InvalidParams(format!("arguments of {} are not JSON: {}", self.function.name, e))
        })
    }
}

/// Everything the model needs for one completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Conversation window, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Tools the model may call.
    pub tools: Vec<ToolDefinition>,
    /// Page context text.
    pub context: String,
}

/// External language model.
///
/// Returns the raw reply so malformed answers can be reported as
/// transport errors by the caller.
#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    /// Complete one request.
    async fn complete(&self, request: ModelRequest) -> Result<Value>;
}

/// A decoded model reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// Final text.
    Message(String),
    /// One or more tool calls, with optional accompanying text.
    ToolCalls {
        /// Text sent alongside the calls.
        content: Option<String>,
        /// Calls in the order the model listed them.
        calls: Vec<ToolCallRequest>,
    },
}

/// Decode a raw model reply.
pub fn parse_reply(reply: Value) -> Result<ModelReply> {
    if let Some(error) = reply.get("error").filter(|e| !e.is_null()) {
        let message = error
            .as_str()
            .map(str::to_string)
            .or_else(|| error.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| error.to_string());
        return Err(Error::Transport(message));
    }

    match reply.get("type").and_then(Value::as_str) {
        Some("message") => return Ok(ModelReply::Message(text_of(&reply))),
        Some("tool_call") => return legacy_tool_call(&reply),
        _ => {}
    }

    let is_assistant = reply.get("role").and_then(Value::as_str) == Some("assistant");
    let calls = reply.get("tool_calls").filter(|calls| !calls.is_null());
    if !is_assistant && calls.is_none() && reply.get("content").is_none() {
        return Err(Error::Transport(format!("malformed model reply: {}", reply)));
    }

    let calls: Vec<ToolCallRequest> = match calls {
        Some(calls) => serde_json::from_value(calls.clone())
            .map_err(|e| Error::Transport(format!("malformed tool calls: {}", e)))?,
        None => Vec::new(),
    };

    if calls.is_empty() {
        return Ok(ModelReply::Message(text_of(&reply)));
    }
    let content = reply
        .get("content")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string);
    Ok(ModelReply::ToolCalls { content, calls })
}

fn text_of(reply: &Value) -> String {
    reply
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn legacy_tool_call(reply: &Value) -> Result<ModelReply> {
    let name = reply
        .get("tool_name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Transport("tool_call reply without tool_name".into()))?;
    let arguments = reply
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));
    let id = format!("call_{}", uuid::Uuid::new_v4().simple());

    Ok(ModelReply::ToolCalls {
        content: None,
        calls: vec![ToolCallRequest::new(id, name, &arguments)],
    })
}
