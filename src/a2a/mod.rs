//! A2A wire shapes and the mapping from domain messages onto them.
//!
//! The framing is JSON over HTTP: a unary send plus a server-streaming send
//! delivered as `text/event-stream` frames. Both directions reuse the same
//! message/part shapes.

pub mod client;
pub mod server;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::CoreError;
use crate::messages::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    Data { data: Value },
    File { name: String, uri: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct A2aMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Used verbatim as the chat-history thread id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub content: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl A2aMessage {
    /// Concatenated text of all text parts; data and file parts contribute
    /// nothing.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text.as_str()),
                Part::Data { .. } | Part::File { .. } => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub request: A2aMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub msg: A2aMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamResponse {
    pub msg: A2aMessage,
}

/// Error frame carried inside a stream that already started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

impl ErrorDetail {
    pub fn from_error(err: &CoreError) -> Self {
        let violations = match err {
            CoreError::Validation(message) => vec![message.clone()],
            _ => Vec::new(),
        };
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            violations,
        }
    }

    /// Best-effort inverse of [`ErrorDetail::from_error`] for client-side
    /// classification.
    pub fn into_error(self) -> CoreError {
        match self.code.as_str() {
            "invalid_argument" => CoreError::Validation(self.message),
            "not_found" => CoreError::NotFound,
            "cancelled" => CoreError::Cancelled,
            "deadline_exceeded" => CoreError::Deadline,
            "unavailable" => CoreError::Unavailable(self.message),
            "resource_exhausted" => CoreError::RateLimited(self.message),
            "unauthenticated" => CoreError::AuthFailed(self.message),
            "permission_denied" => CoreError::PermissionDenied(self.message),
            "message_too_large" => CoreError::MessageTooLarge,
            _ => CoreError::Internal(self.message),
        }
    }
}

/// Map one domain message onto an A2A message.
///
/// Assistant text becomes a text part; tool requests and responses become
/// structured-data parts with tool metadata. User and tool-error messages
/// have no wire representation and map to `None`.
pub fn message_to_a2a(message: &Message) -> Option<A2aMessage> {
    match message {
        Message::Assistant(m) => Some(A2aMessage {
            message_id: None,
            context_id: None,
            role: Role::Agent,
            content: vec![Part::Text {
                text: m.text().to_string(),
            }],
            metadata: None,
        }),
        Message::ToolRequest(m) => Some(A2aMessage {
            message_id: None,
            context_id: None,
            role: Role::Agent,
            content: vec![Part::Data {
                data: json!({
                    "tool": m.tool_name(),
                    "args": Value::Object(m.arguments().clone()),
                }),
            }],
            metadata: Some(json!({
                "tool": m.tool_name(),
                "reason": "Invoking tool",
            })),
        }),
        Message::ToolResponse(m) => Some(A2aMessage {
            message_id: None,
            context_id: None,
            role: Role::User,
            content: vec![Part::Data {
                data: json!({
                    "tool": m.tool_name(),
                    "content": m.content().clone(),
                }),
            }],
            metadata: Some(json!({
                "tool": m.tool_name(),
                "reason": "Invoking tool",
            })),
        }),
        Message::User(_) | Message::ToolError(_) => None,
    }
}
