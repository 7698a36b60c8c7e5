//! Telegram Bot API messenger adapter.
//!
//! Owns the provider limits: outbound text above 4080 bytes is truncated
//! with a marker, and the idempotent "message is not modified" edit failure
//! is swallowed.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::CoreError;
use crate::gateway::ports::Messenger;
use crate::gateway::types::{ChannelId, MessageId, MessageText};

const PROVIDER: &str = "telegram";

/// Telegram's hard cap is 4096; leaving headroom for the truncation marker.
const MAX_OUTBOUND_LEN: usize = 4080;
const TRUNCATION_MARKER: &str = "...[truncated]";

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

pub struct TelegramMessenger {
    http: reqwest::Client,
    token: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

impl TelegramMessenger {
    pub fn new(http: reqwest::Client, token: impl Into<String>) -> Self {
        Self::with_api_base(http, token, DEFAULT_API_BASE)
    }

    pub fn with_api_base(
        http: reqwest::Client,
        token: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        let mut api_base = api_base.into();
        while api_base.ends_with('/') {
            api_base.pop();
        }

        Self {
            http,
            token: token.into(),
            api_base,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, CoreError> {
        let response = self
            .http
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|err| CoreError::unavailable(format!("telegram {method}: {err}")))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CoreError::RateLimited(format!("telegram {method}")));
        }

        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|err| CoreError::unavailable(format!("telegram {method} response: {err}")))?;

        if !parsed.ok {
            let description = parsed.description.unwrap_or_default();
            return Err(CoreError::unavailable(format!(
                "telegram {method} failed: {description}"
            )));
        }

        parsed
            .result
            .ok_or_else(|| CoreError::internal(format!("telegram {method}: ok without result")))
    }

    fn chat_id(channel: &ChannelId) -> Result<i64, CoreError> {
        if channel.provider() != PROVIDER {
            return Err(CoreError::validation(format!(
                "unsupported provider {:?}, expected {PROVIDER:?}",
                channel.provider()
            )));
        }
        channel
            .channel()
            .parse()
            .map_err(|err| CoreError::validation(format!("invalid telegram chat id: {err}")))
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_message(
        &self,
        channel: &ChannelId,
        text: &MessageText,
    ) -> Result<MessageId, CoreError> {
        let chat_id = Self::chat_id(channel)?;
        let content = truncate_outbound(text.text().trim());
        if content.is_empty() {
            return Err(CoreError::validation("cannot send empty message"));
        }

        let sent: SentMessage = self
            .call(
                "sendMessage",
                json!({ "chat_id": chat_id, "text": content }),
            )
            .await?;

        MessageId::new(channel.clone(), sent.message_id.to_string())
    }

    async fn update_message(
        &self,
        message: &MessageId,
        text: &MessageText,
    ) -> Result<(), CoreError> {
        let chat_id = Self::chat_id(message.channel())?;
        let telegram_message_id: i64 = message
            .message()
            .parse()
            .map_err(|err| CoreError::validation(format!("invalid telegram message id: {err}")))?;

        let content = truncate_outbound(text.text().trim());
        if content.is_empty() {
            return Ok(());
        }

        let edited: Result<SentMessage, CoreError> = self
            .call(
                "editMessageText",
                json!({
                    "chat_id": chat_id,
                    "message_id": telegram_message_id,
                    "text": content,
                }),
            )
            .await;

        match edited {
            Ok(_) => Ok(()),
            Err(err) if err.to_string().contains("message is not modified") => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn notify_processing_started(&self, channel: &ChannelId) -> Result<(), CoreError> {
        let chat_id = Self::chat_id(channel)?;

        let _: bool = self
            .call(
                "sendChatAction",
                json!({ "chat_id": chat_id, "action": "typing" }),
            )
            .await?;
        Ok(())
    }
}

fn truncate_outbound(text: &str) -> String {
    if text.len() <= MAX_OUTBOUND_LEN {
        return text.to_string();
    }

    let mut end = MAX_OUTBOUND_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{TRUNCATION_MARKER}", &text[..end])
}
