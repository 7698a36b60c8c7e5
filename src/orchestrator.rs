//! Conversation orchestration: the bounded ReAct loop.
//!
//! One `generate_response` call streams model output, persists every merged
//! message, dispatches tool calls the model emits, feeds results back into
//! the conversation and loops until the model answers without tools or the
//! turn bound is hit.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::json;

use crate::chat::Chat;
use crate::error::CoreError;
use crate::ids::{ModelConfigId, UserId};
use crate::messages::{
    Message, MessageStream, ToolErrorMessage, ToolRequestMessage, UserMessage,
    merge_messages_streaming,
};
use crate::ports::{
    AccountStorage, ChatModel, ModelSettingsStorage, StreamOptions, ThreadStorage, ToolManager,
};
use crate::toolset::ToolChoice;

/// Upper bound on model invocations within one `generate_response` call,
/// regardless of how persistently the model keeps calling tools.
pub const MAX_TURNS: usize = 10;

const TOOL_RESPONSE_TOO_LARGE: &str =
    "tool response is too large, consider make it shorter, or add more precise filtering";

/// Structured observability callbacks for the loop. Tracing is the default
/// sink; tests plug in recorders.
pub trait GenerateCallbacks: Send + Sync {
    fn tool_called(&self, thread_id: &str, user: UserId, requests: &[ToolRequestMessage]);
    fn max_turns_reached(&self, thread_id: &str, user: UserId);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingCallbacks;

impl GenerateCallbacks for TracingCallbacks {
    fn tool_called(&self, thread_id: &str, user: UserId, requests: &[ToolRequestMessage]) {
        let tools: Vec<&str> = requests.iter().map(ToolRequestMessage::tool_name).collect();
        tracing::info!(thread_id, %user, ?tools, "model requested tool calls");
    }

    fn max_turns_reached(&self, thread_id: &str, user: UserId) {
        tracing::warn!(thread_id, %user, "conversation loop hit the turn bound with tool calls pending");
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallbacks;

impl GenerateCallbacks for NoopCallbacks {
    fn tool_called(&self, _thread_id: &str, _user: UserId, _requests: &[ToolRequestMessage]) {}
    fn max_turns_reached(&self, _thread_id: &str, _user: UserId) {}
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub tool_choice: ToolChoice,
    /// Overrides the service default when set.
    pub model: Option<ModelConfigId>,
}

#[derive(Clone)]
pub struct ChatService {
    storage: Arc<dyn ThreadStorage>,
    model: Arc<dyn ChatModel>,
    tools: Arc<dyn ToolManager>,
    accounts: Arc<dyn AccountStorage>,
    models: Arc<dyn ModelSettingsStorage>,
    default_model: ModelConfigId,
    callbacks: Arc<dyn GenerateCallbacks>,
}

impl ChatService {
    pub fn new(
        storage: Arc<dyn ThreadStorage>,
        model: Arc<dyn ChatModel>,
        tools: Arc<dyn ToolManager>,
        accounts: Arc<dyn AccountStorage>,
        models: Arc<dyn ModelSettingsStorage>,
        default_model: ModelConfigId,
        callbacks: Arc<dyn GenerateCallbacks>,
    ) -> Self {
        Self {
            storage,
            model,
            tools,
            accounts,
            models,
            default_model,
            callbacks,
        }
    }

    /// Run the conversation loop for one inbound user message.
    ///
    /// Settings lookup and the history append happen before the stream is
    /// handed out, so early failures surface as a plain `Err`. Messages are
    /// yielded in append order; each yield happens after the message was
    /// persisted. Dropping the stream stops the loop cleanly.
    pub async fn generate_response(
        &self,
        user: UserId,
        thread_id: &str,
        message: UserMessage,
        options: GenerateOptions,
    ) -> Result<MessageStream, CoreError> {
        let model_id = options.model.unwrap_or(self.default_model);
        let settings = self.models.get_model(model_id).await?;

        let mut chat = self.get_or_create_chat(user, thread_id, message).await?;

        let service = self.clone();
        let tool_choice = options.tool_choice;

        Ok(Box::pin(async_stream::stream! {
            for turn in 0..MAX_TURNS {
                let stream_options = StreamOptions {
                    tools: if tool_choice == ToolChoice::Forbidden {
                        Vec::new()
                    } else {
                        chat.relevant_tools()
                    },
                    tool_choice,
                };

                let model_stream = match service
                    .model
                    .stream(chat.messages(), &settings, stream_options)
                    .await
                {
                    Ok(stream) => stream,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };

                let mut merged = merge_messages_streaming(model_stream);
                let mut tool_requests: Vec<ToolRequestMessage> = Vec::new();

                while let Some(item) = merged.next().await {
                    let message = match item {
                        Ok(message) => message,
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    };

                    if let Err(err) = chat.add_message(message.clone()).await {
                        yield Err(err);
                        return;
                    }
                    if let Message::ToolRequest(request) = &message {
                        tool_requests.push(request.clone());
                    }
                    yield Ok(message);
                }
                drop(merged);

                if tool_requests.is_empty() {
                    return;
                }

                service
                    .callbacks
                    .tool_called(chat.thread_id(), user, &tool_requests);

                for request in &tool_requests {
                    let call = match chat
                        .decode_tool_call(request.tool_name(), request.arguments().clone())
                    {
                        Ok(call) => call,
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    };

                    let result = match service.tools.execute_tool(call.clone()).await {
                        Ok(message) => message,
                        Err(CoreError::MessageTooLarge) => {
                            match ToolErrorMessage::new(
                                json!(TOOL_RESPONSE_TOO_LARGE),
                                call.tool_name(),
                                call.call_id(),
                            ) {
                                Ok(message) => Message::ToolError(message),
                                Err(err) => {
                                    yield Err(err);
                                    return;
                                }
                            }
                        }
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    };

                    if let Err(err) = chat.add_message(result.clone()).await {
                        yield Err(err);
                        return;
                    }
                    yield Ok(result);
                }

                if turn == MAX_TURNS - 1 {
                    service.callbacks.max_turns_reached(chat.thread_id(), user);
                }
            }
        }))
    }

    async fn get_or_create_chat(
        &self,
        user: UserId,
        thread_id: &str,
        message: UserMessage,
    ) -> Result<Chat, CoreError> {
        let loaded = Chat::load(
            self.storage.clone(),
            self.tools.clone(),
            self.accounts.clone(),
            user,
            thread_id,
        )
        .await;

        let mut chat = match loaded {
            Ok(chat) => chat,
            Err(CoreError::NotFound) => {
                Chat::create(
                    self.storage.clone(),
                    self.tools.clone(),
                    self.accounts.clone(),
                    user,
                    thread_id,
                    Vec::new(),
                )
                .await?
            }
            Err(err) => return Err(err),
        };

        chat.add_message(Message::User(message)).await?;
        Ok(chat)
    }
}
