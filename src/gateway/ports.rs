//! Port contracts consumed by the gateway pipeline.

use async_trait::async_trait;

use crate::a2a::client::TextStream;
use crate::error::CoreError;
use crate::gateway::types::{ChannelId, MessageId, MessageText};

/// Outbound messenger operations. Implementations own provider limits such
/// as maximum message length and apply them at this boundary.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a new message and return its id for later edits.
    async fn send_message(
        &self,
        channel: &ChannelId,
        text: &MessageText,
    ) -> Result<MessageId, CoreError>;

    /// Replace the text of an already sent message. An edit that changes
    /// nothing is not an error.
    async fn update_message(&self, message: &MessageId, text: &MessageText)
    -> Result<(), CoreError>;

    /// Best-effort "the bot is typing" signal.
    async fn notify_processing_started(&self, channel: &ChannelId) -> Result<(), CoreError>;
}

/// The agent service as the gateway sees it: one streaming call.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn send_message(
        &self,
        message: &MessageId,
        text: &MessageText,
    ) -> Result<TextStream, CoreError>;
}
