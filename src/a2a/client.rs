//! A2A client used by the gateway: posts the user's message and consumes the
//! reply as a lazy sequence of text chunks.

use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use reqwest::StatusCode;

use super::{A2aMessage, ErrorFrame, Part, Role, SendMessageRequest, StreamResponse};
use crate::error::CoreError;
use crate::gateway::types::{MessageId, MessageText};
use crate::sse::EventStreamDecoder;

pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, CoreError>> + Send>>;

#[derive(Debug, Clone)]
pub struct A2aClient {
    http: reqwest::Client,
    base_url: String,
}

impl A2aClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Self { http, base_url }
    }

    /// Open the streaming send. The returned stream yields the text of each
    /// agent frame; frames without text parts (tool activity) are skipped.
    pub async fn send_message(
        &self,
        message_id: &MessageId,
        text: &MessageText,
    ) -> Result<TextStream, CoreError> {
        let request = SendMessageRequest {
            request: A2aMessage {
                message_id: Some(message_id.to_string()),
                context_id: Some(message_id.channel().to_string()),
                role: Role::User,
                content: vec![Part::Text {
                    text: text.text().to_string(),
                }],
                metadata: None,
            },
        };

        let response = self
            .http
            .post(format!("{}/v1/message:stream", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|err| CoreError::unavailable(format!("sending message to a2a: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let mut byte_stream = response.bytes_stream();

        Ok(Box::pin(async_stream::stream! {
            let mut decoder = EventStreamDecoder::new();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(CoreError::unavailable(format!(
                            "receiving streaming response from a2a: {err}"
                        )));
                        return;
                    }
                };

                for payload in decoder.feed(&chunk) {
                    if let Ok(frame) = serde_json::from_str::<ErrorFrame>(&payload) {
                        yield Err(frame.error.into_error());
                        return;
                    }

                    match serde_json::from_str::<StreamResponse>(&payload) {
                        Ok(frame) => {
                            let text = frame.msg.text();
                            if !text.is_empty() {
                                yield Ok(text);
                            }
                        }
                        Err(err) => {
                            yield Err(CoreError::internal(format!(
                                "malformed a2a stream frame: {err}"
                            )));
                            return;
                        }
                    }
                }
            }
        }))
    }
}

#[async_trait::async_trait]
impl crate::gateway::ports::Agent for A2aClient {
    async fn send_message(
        &self,
        message: &MessageId,
        text: &MessageText,
    ) -> Result<TextStream, CoreError> {
        A2aClient::send_message(self, message, text).await
    }
}

fn classify_status(status: StatusCode, body: &str) -> CoreError {
    match status {
        StatusCode::BAD_REQUEST => CoreError::validation(body.to_string()),
        StatusCode::NOT_FOUND => CoreError::NotFound,
        StatusCode::UNAUTHORIZED => CoreError::AuthFailed(body.to_string()),
        StatusCode::FORBIDDEN => CoreError::PermissionDenied(body.to_string()),
        StatusCode::TOO_MANY_REQUESTS => CoreError::RateLimited(body.to_string()),
        StatusCode::SERVICE_UNAVAILABLE => {
            CoreError::unavailable(format!("a2a service is unavailable: {body}"))
        }
        StatusCode::GATEWAY_TIMEOUT => CoreError::Deadline,
        other => CoreError::internal(format!("a2a returned status {other}: {body}")),
    }
}
