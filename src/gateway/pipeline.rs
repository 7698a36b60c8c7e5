//! The gateway usecase: turn an inbound messenger update into a streamed,
//! edited-in-place reply.
//!
//! The reply stream is batched: the first chunk goes out immediately as a
//! new message (fast first feedback), later chunks accumulate and the sent
//! message is edited at most once per update interval, plus one final edit
//! for whatever remains when the stream ends. Failures turn into a short
//! user-facing explanation delivered into the same chat.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::Instant;

use crate::error::CoreError;
use crate::gateway::ports::{Agent, Messenger};
use crate::gateway::types::{InboundMessage, MessageId, MessageText};

/// Telegram-friendly default: frequent enough to feel live, rare enough to
/// stay clear of edit rate limits.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(3);

pub struct GatewayService {
    messenger: Arc<dyn Messenger>,
    agent: Arc<dyn Agent>,
    update_interval: Duration,
}

impl GatewayService {
    pub fn new(messenger: Arc<dyn Messenger>, agent: Arc<dyn Agent>) -> Self {
        Self {
            messenger,
            agent,
            update_interval: DEFAULT_UPDATE_INTERVAL,
        }
    }

    /// The update interval is messenger-bound, not business logic; tests and
    /// other adapters pick their own cadence.
    pub fn with_update_interval(mut self, update_interval: Duration) -> Self {
        self.update_interval = update_interval;
        self
    }

    /// Process one inbound message end to end. Non-text messages are no-ops.
    pub async fn receive_new_message_event(
        &self,
        message: &InboundMessage,
    ) -> Result<(), CoreError> {
        let Some(text) = message.text() else {
            return Ok(());
        };
        let channel = message.id().channel();

        if let Err(err) = self.messenger.notify_processing_started(channel).await {
            tracing::warn!(%channel, error = %err, "typing notification failed");
        }

        let mut reply = match self.agent.send_message(message.id(), text).await {
            Ok(reply) => reply,
            Err(err) => {
                self.deliver_error(&err, None, message).await;
                return Err(err);
            }
        };

        let mut accumulated = String::new();
        let mut sent_message: Option<MessageId> = None;
        let mut last_update = Instant::now();
        let mut needs_final_update = false;

        while let Some(item) = reply.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(err) => {
                    self.deliver_error(&err, sent_message.as_ref(), message).await;
                    return Err(err);
                }
            };

            accumulated.push_str(&chunk);
            needs_final_update = true;

            let Some(sent) = &sent_message else {
                let outbound = MessageText::new(accumulated.clone())?;
                let id = self
                    .messenger
                    .send_message(channel, &outbound)
                    .await?;
                sent_message = Some(id);
                last_update = Instant::now();
                needs_final_update = false;
                continue;
            };

            if last_update.elapsed() >= self.update_interval {
                let outbound = MessageText::new(accumulated.clone())?;
                self.messenger.update_message(sent, &outbound).await?;
                last_update = Instant::now();
                needs_final_update = false;
            }
        }

        if needs_final_update {
            if let Some(sent) = &sent_message {
                let outbound = MessageText::new(accumulated)?;
                self.messenger.update_message(sent, &outbound).await?;
            }
        }

        Ok(())
    }

    /// Explain a failure in the chat: edit the partial reply when one exists,
    /// otherwise send a fresh message. Best effort on top of a failure.
    async fn deliver_error(
        &self,
        err: &CoreError,
        sent_message: Option<&MessageId>,
        message: &InboundMessage,
    ) {
        let friendly = user_friendly_error(err);
        let Ok(outbound) = MessageText::new(friendly) else {
            return;
        };

        let delivery = match sent_message {
            Some(sent) => self.messenger.update_message(sent, &outbound).await,
            None => self
                .messenger
                .send_message(message.id().channel(), &outbound)
                .await
                .map(|_| ()),
        };
        if let Err(delivery_err) = delivery {
            tracing::warn!(error = %delivery_err, "failed to deliver error notice");
        }
    }
}

/// Translate a failure into a short, emoji-prefixed explanation for the chat.
pub fn user_friendly_error(err: &CoreError) -> String {
    match err {
        CoreError::Deadline => {
            "⏱ The agent is taking too long to respond. Please try again later.".to_string()
        }
        CoreError::Unavailable(_) => {
            "🔌 The agent service is temporarily unavailable. Please try again in a few moments."
                .to_string()
        }
        CoreError::Cancelled => "🚫 The request was canceled. Please try again.".to_string(),
        CoreError::RateLimited(_) => {
            "⚠️ The service is currently overloaded. Please try again in a few moments.".to_string()
        }
        CoreError::AuthRequired(_) | CoreError::AuthFailed(_) => {
            "🔐 Authentication failed. Please check your credentials.".to_string()
        }
        CoreError::PermissionDenied(_) => {
            "🚫 You don't have permission to perform this action.".to_string()
        }
        CoreError::Validation(_) | CoreError::MessageTooLarge => {
            "❌ Invalid message format. Please check your input.".to_string()
        }
        other => format!("❌ An unexpected error occurred: {other}"),
    }
}
