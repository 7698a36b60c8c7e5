//! Chat model adapter for OpenAI-compatible streaming APIs.
//!
//! Translates the conversation into a `/chat/completions` request with the
//! virtual toolset attached, and the SSE reply into merge-tagged message
//! fragments: text deltas share one tag per response so the streaming merge
//! collapses them into a single assistant message, while assembled tool
//! calls surface as individual tool-request messages.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::messages::{
    AssistantMessage, Message, MessageStream, ToolRequestMessage,
};
use crate::model_settings::ModelSettings;
use crate::ports::{ChatModel, StreamOptions};
use crate::sse::EventStreamDecoder;
use crate::toolset::{RawToolInfo, ToolChoice};

/// Merge tag attached to every text delta of one response.
const RESPONSE_MERGE_TAG: u64 = 1;

pub struct OpenAiChatModel {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl OpenAiChatModel {
    pub fn new(
        http: reqwest::Client,
        api_base: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let mut api_base = api_base.into();
        while api_base.ends_with('/') {
            api_base.pop();
        }

        Self {
            http,
            api_base,
            api_key: api_key.into(),
        }
    }
}

// ── Request shapes ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    r#type: &'static str,
    function: WireToolCallFunction,
}

#[derive(Debug, Serialize)]
struct WireToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: &'static str,
    function: WireToolFunction,
}

#[derive(Debug, Serialize)]
struct WireToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

fn build_request(
    input: &[Message],
    settings: &ModelSettings,
    options: &StreamOptions,
) -> ChatRequest {
    let mut messages = Vec::with_capacity(input.len() + 1);
    if !settings.system_message().is_empty() {
        messages.push(WireMessage {
            role: "system",
            content: Some(settings.system_message().to_string()),
            tool_call_id: None,
            tool_calls: Vec::new(),
        });
    }

    for message in input {
        match message {
            Message::User(m) => messages.push(WireMessage {
                role: "user",
                content: Some(m.content().to_string()),
                tool_call_id: None,
                tool_calls: Vec::new(),
            }),
            Message::Assistant(m) => messages.push(WireMessage {
                role: "assistant",
                content: Some(m.text().to_string()),
                tool_call_id: None,
                tool_calls: Vec::new(),
            }),
            Message::ToolRequest(m) => messages.push(WireMessage {
                role: "assistant",
                content: None,
                tool_call_id: None,
                tool_calls: vec![WireToolCall {
                    id: m.tool_call_id().to_string(),
                    r#type: "function",
                    function: WireToolCallFunction {
                        name: m.tool_name().to_string(),
                        arguments: Value::Object(m.arguments().clone()).to_string(),
                    },
                }],
            }),
            Message::ToolResponse(m) => messages.push(WireMessage {
                role: "tool",
                content: Some(m.content().to_string()),
                tool_call_id: Some(m.tool_call_id().to_string()),
                tool_calls: Vec::new(),
            }),
            Message::ToolError(m) => messages.push(WireMessage {
                role: "tool",
                content: Some(m.content().to_string()),
                tool_call_id: Some(m.tool_call_id().to_string()),
                tool_calls: Vec::new(),
            }),
        }
    }

    let tools: Vec<WireTool> = options.tools.iter().map(wire_tool).collect();
    let tool_choice = if tools.is_empty() {
        None
    } else {
        match options.tool_choice {
            ToolChoice::Forbidden => None,
            ToolChoice::Allowed => Some("auto"),
            ToolChoice::Forced => Some("required"),
        }
    };

    ChatRequest {
        model: settings.model().to_string(),
        messages,
        stream: true,
        temperature: settings.temperature(),
        top_p: settings.top_p(),
        stop: settings.stop_words().to_vec(),
        tools,
        tool_choice,
    }
}

fn wire_tool(info: &RawToolInfo) -> WireTool {
    WireTool {
        r#type: "function",
        function: WireToolFunction {
            name: info.name().to_string(),
            description: info.description().to_string(),
            parameters: info.params_schema().clone(),
        },
    }
}

// ── Response shapes ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: ToolCallFunctionDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ToolCallFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Assembles streamed tool-call fragments into complete requests.
#[derive(Debug, Default)]
struct ToolCallAssembler {
    builders: Vec<ToolCallBuilder>,
}

#[derive(Debug, Default)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments_json: String,
}

impl ToolCallAssembler {
    fn feed(&mut self, delta: &ToolCallDelta) {
        while self.builders.len() <= delta.index {
            self.builders.push(ToolCallBuilder::default());
        }

        let builder = &mut self.builders[delta.index];
        if let Some(id) = &delta.id {
            builder.id.clone_from(id);
        }
        if let Some(name) = &delta.function.name {
            builder.name.clone_from(name);
        }
        if let Some(arguments) = &delta.function.arguments {
            builder.arguments_json.push_str(arguments);
        }
    }

    fn finish(self) -> Result<Vec<ToolRequestMessage>, CoreError> {
        let mut requests = Vec::with_capacity(self.builders.len());
        for builder in self.builders {
            if builder.id.is_empty() || builder.name.is_empty() {
                if !builder.arguments_json.trim().is_empty() {
                    tracing::warn!("skipping incomplete streamed tool call");
                }
                continue;
            }

            let arguments: Map<String, Value> = if builder.arguments_json.trim().is_empty() {
                Map::new()
            } else {
                serde_json::from_str(&builder.arguments_json).map_err(|err| {
                    CoreError::internal(format!(
                        "malformed tool call arguments for {:?}: {err}",
                        builder.name
                    ))
                })?
            };

            requests.push(ToolRequestMessage::new(arguments, builder.name, builder.id)?);
        }

        Ok(requests)
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn stream(
        &self,
        input: &[Message],
        settings: &ModelSettings,
        options: StreamOptions,
    ) -> Result<MessageStream, CoreError> {
        let request = build_request(input, settings, &options);

        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| CoreError::unavailable(format!("model request: {err}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CoreError::RateLimited("model provider".into()));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(CoreError::AuthFailed("model provider rejected the key".into()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::unavailable(format!(
                "model provider returned {status}: {body}"
            )));
        }

        let mut byte_stream = response.bytes_stream();

        let stream: MessageStream = Box::pin(async_stream::stream! {
            let mut decoder = EventStreamDecoder::new();
            let mut assembler = ToolCallAssembler::default();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(CoreError::unavailable(format!("model stream: {err}")));
                        return;
                    }
                };

                for payload in decoder.feed(&chunk) {
                    let parsed: ChatChunk = match serde_json::from_str(&payload) {
                        Ok(parsed) => parsed,
                        Err(err) => {
                            yield Err(CoreError::internal(format!(
                                "malformed model chunk: {err}"
                            )));
                            return;
                        }
                    };

                    for choice in &parsed.choices {
                        if let Some(content) = &choice.delta.content {
                            if !content.is_empty() {
                                match AssistantMessage::new(content.clone()) {
                                    Ok(fragment) => {
                                        yield Ok(Message::Assistant(
                                            fragment.with_merge_tag(RESPONSE_MERGE_TAG),
                                        ));
                                    }
                                    Err(err) => {
                                        yield Err(err);
                                        return;
                                    }
                                }
                            }
                        }
                        for delta in &choice.delta.tool_calls {
                            assembler.feed(delta);
                        }
                    }
                }
            }

            match assembler.finish() {
                Ok(requests) => {
                    for request in requests {
                        yield Ok(Message::ToolRequest(request));
                    }
                }
                Err(err) => yield Err(err),
            }
        });

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ModelConfigId;
    use crate::messages::UserMessage;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn settings() -> ModelSettings {
        ModelSettings::new(ModelConfigId::random(), "gpt-4o")
            .unwrap()
            .with_system_message("be helpful")
            .with_temperature(0.3)
    }

    #[test]
    fn request_carries_system_message_first() {
        let input = vec![Message::User(UserMessage::new("hi").unwrap())];
        let request = build_request(&input, &settings(), &StreamOptions::default());

        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].role, "user");
        assert!(request.stream);
        assert_eq!(request.temperature, Some(0.3));
        assert!(request.tools.is_empty());
        assert!(request.tool_choice.is_none());
    }

    #[test]
    fn tool_request_round_trips_as_assistant_tool_call() {
        let mut args = Map::new();
        args.insert("city".into(), json!("NYC"));
        let input = vec![Message::ToolRequest(
            ToolRequestMessage::new(args, "get_weather", "c1").unwrap(),
        )];

        let request = build_request(&input, &settings(), &StreamOptions::default());
        let wire = &request.messages[1];
        assert_eq!(wire.role, "assistant");
        assert_eq!(wire.tool_calls[0].function.name, "get_weather");
        assert!(wire.tool_calls[0].function.arguments.contains("NYC"));
    }

    #[test]
    fn allowed_tools_set_auto_choice() {
        let info = RawToolInfo::new(
            "get_weather",
            "Current weather",
            BTreeMap::from([(
                "acc".to_string(),
                crate::ids::AccountId::random(
                    crate::ids::UserId::random(),
                    crate::ids::ServerId::random(),
                ),
            )]),
            json!({"type": "object"}),
            json!({"type": "string"}),
        )
        .unwrap();

        let options = StreamOptions {
            tools: vec![info],
            tool_choice: ToolChoice::Allowed,
        };
        let input = vec![Message::User(UserMessage::new("weather?").unwrap())];
        let request = build_request(&input, &settings(), &options);

        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.tool_choice, Some("auto"));

        let forced = build_request(
            &input,
            &settings(),
            &StreamOptions {
                tool_choice: ToolChoice::Forced,
                ..options
            },
        );
        assert_eq!(forced.tool_choice, Some("required"));
    }

    #[test]
    fn assembler_collects_split_tool_call() {
        let mut assembler = ToolCallAssembler::default();
        assembler.feed(&ToolCallDelta {
            index: 0,
            id: Some("c1".into()),
            function: ToolCallFunctionDelta {
                name: Some("get_weather".into()),
                arguments: Some("{\"city\":".into()),
            },
        });
        assembler.feed(&ToolCallDelta {
            index: 0,
            id: None,
            function: ToolCallFunctionDelta {
                name: None,
                arguments: Some("\"NYC\"}".into()),
            },
        });

        let requests = assembler.finish().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].tool_name(), "get_weather");
        assert_eq!(requests[0].arguments()["city"], json!("NYC"));
    }

    #[test]
    fn assembler_skips_incomplete_builders() {
        let mut assembler = ToolCallAssembler::default();
        assembler.feed(&ToolCallDelta {
            index: 0,
            id: None,
            function: ToolCallFunctionDelta {
                name: None,
                arguments: Some("{}".into()),
            },
        });

        assert!(assembler.finish().unwrap().is_empty());
    }

    #[test]
    fn assembler_rejects_malformed_arguments() {
        let mut assembler = ToolCallAssembler::default();
        assembler.feed(&ToolCallDelta {
            index: 0,
            id: Some("c1".into()),
            function: ToolCallFunctionDelta {
                name: Some("t".into()),
                arguments: Some("{not json".into()),
            },
        });

        assert!(assembler.finish().is_err());
    }

    #[test]
    fn chunk_deserializes_text_delta() {
        let chunk: ChatChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":"Hi, "},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hi, "));
    }
}
