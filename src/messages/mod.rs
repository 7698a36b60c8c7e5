//! Message algebra for conversations between users, the model, and tools.
//!
//! Exactly five kinds exist. Values are built through validating constructors
//! and are immutable afterwards, so a `Message` that exists is a `Message`
//! that validates; `validate` stays available for re-checking data that
//! crossed a serialization boundary.

mod merge;

pub use merge::{MessageStream, merge_messages_streaming};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Upper bound, in serialized bytes, for message content and marshaled tool
/// payloads.
pub const MAX_MESSAGE_LEN: usize = 2048;

/// A single conversation entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    ToolRequest(ToolRequestMessage),
    ToolResponse(ToolResponseMessage),
    ToolError(ToolErrorMessage),
}

impl Message {
    pub fn merge_tag(&self) -> u64 {
        match self {
            Self::User(m) => m.merge_tag,
            Self::Assistant(m) => m.merge_tag,
            Self::ToolRequest(m) => m.merge_tag,
            Self::ToolResponse(m) => m.merge_tag,
            Self::ToolError(m) => m.merge_tag,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Assistant(_) => "assistant",
            Self::ToolRequest(_) => "tool_request",
            Self::ToolResponse(_) => "tool_response",
            Self::ToolError(_) => "tool_error",
        }
    }

    /// True for tool response/error kinds, which terminate a tool exchange.
    pub fn is_tool_result(&self) -> bool {
        matches!(self, Self::ToolResponse(_) | Self::ToolError(_))
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Self::User(m) => m.validate(),
            Self::Assistant(m) => m.validate(),
            Self::ToolRequest(m) => m.validate(),
            Self::ToolResponse(m) => m.validate(),
            Self::ToolError(m) => m.validate(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

fn payload_len(value: &impl Serialize) -> usize {
    serde_json::to_vec(value).map(|buf| buf.len()).unwrap_or(usize::MAX)
}

/// Inbound text from a human, with optional structured extras attached by the
/// transport (provider message ids, locale hints and the like).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    content: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    extra: Map<String, Value>,
    #[serde(default)]
    merge_tag: u64,
}

impl UserMessage {
    pub fn new(content: impl Into<String>) -> Result<Self, CoreError> {
        let message = Self {
            content: content.into(),
            extra: Map::new(),
            merge_tag: 0,
        };
        message.validate()?;
        Ok(message)
    }

    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    pub fn with_merge_tag(mut self, merge_tag: u64) -> Self {
        self.merge_tag = merge_tag;
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.content.is_empty() {
            return Err(CoreError::validation("content cannot be empty"));
        }
        if self.content.len() > MAX_MESSAGE_LEN {
            return Err(CoreError::MessageTooLarge);
        }
        Ok(())
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    pub fn merge_tag(&self) -> u64 {
        self.merge_tag
    }
}

/// A binary attachment streamed alongside assistant text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub mime_type: String,
    pub data: String,
}

/// Model-produced text, with optional reasoning and attachments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    reasoning: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<Attachment>,
    #[serde(default)]
    merge_tag: u64,
}

impl AssistantMessage {
    pub fn new(text: impl Into<String>) -> Result<Self, CoreError> {
        let message = Self {
            text: text.into(),
            reasoning: String::new(),
            attachments: Vec::new(),
            merge_tag: 0,
        };
        message.validate()?;
        Ok(message)
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_merge_tag(mut self, merge_tag: u64) -> Self {
        self.merge_tag = merge_tag;
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.text.is_empty() {
            return Err(CoreError::validation("text cannot be empty"));
        }
        if self.text.len() > MAX_MESSAGE_LEN {
            return Err(CoreError::MessageTooLarge);
        }
        Ok(())
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn merge_tag(&self) -> u64 {
        self.merge_tag
    }
}

/// The model asking for a tool invocation. The tool name refers to the
/// virtual toolset; the target account is resolved later from the arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequestMessage {
    tool_name: String,
    tool_call_id: String,
    arguments: Map<String, Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    reasoning: String,
    #[serde(default)]
    merge_tag: u64,
}

impl ToolRequestMessage {
    pub fn new(
        arguments: Map<String, Value>,
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let message = Self {
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
            arguments,
            reasoning: String::new(),
            merge_tag: 0,
        };
        message.validate()?;
        Ok(message)
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_merge_tag(mut self, merge_tag: u64) -> Self {
        self.merge_tag = merge_tag;
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.tool_name.is_empty() {
            return Err(CoreError::validation("tool name cannot be empty"));
        }
        if self.tool_call_id.is_empty() {
            return Err(CoreError::validation("tool call id cannot be empty"));
        }
        if payload_len(&self.arguments) > MAX_MESSAGE_LEN {
            return Err(CoreError::MessageTooLarge);
        }
        Ok(())
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn tool_call_id(&self) -> &str {
        &self.tool_call_id
    }

    pub fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn merge_tag(&self) -> u64 {
        self.merge_tag
    }
}

/// A successful tool result, as an opaque JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponseMessage {
    tool_name: String,
    tool_call_id: String,
    content: Value,
    #[serde(default)]
    merge_tag: u64,
}

impl ToolResponseMessage {
    pub fn new(
        content: Value,
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let message = Self {
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
            content,
            merge_tag: 0,
        };
        message.validate()?;
        Ok(message)
    }

    pub fn with_merge_tag(mut self, merge_tag: u64) -> Self {
        self.merge_tag = merge_tag;
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        validate_tool_result(&self.tool_name, &self.tool_call_id, &self.content)
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn tool_call_id(&self) -> &str {
        &self.tool_call_id
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    pub fn merge_tag(&self) -> u64 {
        self.merge_tag
    }
}

/// A failed tool invocation, shaped like a response so the model can read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolErrorMessage {
    tool_name: String,
    tool_call_id: String,
    content: Value,
    #[serde(default)]
    merge_tag: u64,
}

impl ToolErrorMessage {
    pub fn new(
        content: Value,
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let message = Self {
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
            content,
            merge_tag: 0,
        };
        message.validate()?;
        Ok(message)
    }

    pub fn with_merge_tag(mut self, merge_tag: u64) -> Self {
        self.merge_tag = merge_tag;
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        validate_tool_result(&self.tool_name, &self.tool_call_id, &self.content)
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn tool_call_id(&self) -> &str {
        &self.tool_call_id
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    pub fn merge_tag(&self) -> u64 {
        self.merge_tag
    }
}

fn validate_tool_result(tool_name: &str, tool_call_id: &str, content: &Value) -> Result<(), CoreError> {
    if tool_name.is_empty() {
        return Err(CoreError::validation("tool name cannot be empty"));
    }
    if tool_call_id.is_empty() {
        return Err(CoreError::validation("tool call id cannot be empty"));
    }
    if payload_len(content) > MAX_MESSAGE_LEN {
        return Err(CoreError::MessageTooLarge);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_message_rejects_empty_content() {
        assert!(matches!(
            UserMessage::new(""),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn content_boundary_is_2048_bytes() {
        let at_limit = "x".repeat(MAX_MESSAGE_LEN);
        assert!(UserMessage::new(at_limit).is_ok());

        let over_limit = "x".repeat(MAX_MESSAGE_LEN + 1);
        assert!(matches!(
            UserMessage::new(over_limit),
            Err(CoreError::MessageTooLarge)
        ));
    }

    #[test]
    fn assistant_boundary_is_2048_bytes() {
        assert!(AssistantMessage::new("y".repeat(MAX_MESSAGE_LEN)).is_ok());
        assert!(matches!(
            AssistantMessage::new("y".repeat(MAX_MESSAGE_LEN + 1)),
            Err(CoreError::MessageTooLarge)
        ));
    }

    #[test]
    fn tool_request_requires_name_and_call_id() {
        let args = Map::new();
        assert!(ToolRequestMessage::new(args.clone(), "", "c1").is_err());
        assert!(ToolRequestMessage::new(args.clone(), "search", "").is_err());
        assert!(ToolRequestMessage::new(args, "search", "c1").is_ok());
    }

    #[test]
    fn tool_request_bounds_marshaled_arguments() {
        let mut args = Map::new();
        args.insert("blob".into(), json!("z".repeat(MAX_MESSAGE_LEN)));
        assert!(matches!(
            ToolRequestMessage::new(args, "search", "c1"),
            Err(CoreError::MessageTooLarge)
        ));
    }

    #[test]
    fn tool_response_bounds_marshaled_content() {
        let content = json!("z".repeat(MAX_MESSAGE_LEN + 1));
        assert!(matches!(
            ToolResponseMessage::new(content, "search", "c1"),
            Err(CoreError::MessageTooLarge)
        ));

        let small = json!({"temp": 57});
        assert!(ToolResponseMessage::new(small, "search", "c1").is_ok());
    }

    #[test]
    fn constructed_messages_are_valid() {
        let msg = Message::User(
            UserMessage::new("hello").unwrap().with_merge_tag(7),
        );
        assert!(msg.is_valid());
        assert_eq!(msg.merge_tag(), 7);
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn tool_result_kinds_are_recognized() {
        let resp = Message::ToolResponse(
            ToolResponseMessage::new(json!({}), "t", "c").unwrap(),
        );
        let err = Message::ToolError(ToolErrorMessage::new(json!("boom"), "t", "c").unwrap());
        let user = Message::User(UserMessage::new("hi").unwrap());

        assert!(resp.is_tool_result());
        assert!(err.is_tool_result());
        assert!(!user.is_tool_result());
    }

    #[test]
    fn message_serde_round_trip() {
        let original = Message::ToolRequest(
            ToolRequestMessage::new(
                serde_json::from_value(json!({"city": "NYC"})).unwrap(),
                "get_weather",
                "c1",
            )
            .unwrap()
            .with_merge_tag(3),
        );

        let encoded = serde_json::to_string(&original).unwrap();
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, original);
    }
}
