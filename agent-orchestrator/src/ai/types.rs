use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A capability invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Declared capability schema sent to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object
    pub parameters: Value,
}

/// One turn of the agentic transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User {
        text: String,
    },
    Model {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    ToolResponse {
        call_id: String,
        name: String,
        content: Value,
    },
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Turn::User { text: text.into() }
    }

    /// Content of a tool response rendered as the text a chat API expects
    pub fn content_text(content: &Value) -> String {
        match content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub transcript: Vec<Turn>,
    pub tools: Vec<ToolDeclaration>,
}

/// Normalized provider answer
#[derive(Debug, Clone, PartialEq)]
pub enum GenerateResponse {
    /// Plain text with no capability requests
    Text(String),
    /// One or more capability requests, in response order
    ToolCalls { text: String, calls: Vec<ToolCall> },
    /// No response candidate at all (safety block, empty choices)
    NoCandidates { reason: String },
}

impl GenerateResponse {
    /// Build from parsed text and calls, choosing the variant
    pub fn from_parts(text: String, calls: Vec<ToolCall>) -> Self {
        if calls.is_empty() {
            GenerateResponse::Text(text)
        } else {
            GenerateResponse::ToolCalls { text, calls }
        }
    }
}
