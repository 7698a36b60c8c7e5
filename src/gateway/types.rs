//! Gateway-side value objects. Identifiers here are provider-scoped strings,
//! unlike the agent core's UUID-backed ids: the messenger decides what a
//! chat or user id looks like.

use std::fmt;

use crate::error::CoreError;

/// Longest inbound/outbound text the gateway will carry end to end.
pub const MAX_TEXT_LEN: usize = 8000;

/// One chat (or channel) at one messenger provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId {
    provider: String,
    channel: String,
}

impl ChannelId {
    pub fn new(provider: impl Into<String>, channel: impl Into<String>) -> Result<Self, CoreError> {
        let provider = provider.into();
        let channel = channel.into();
        if provider.is_empty() {
            return Err(CoreError::validation("provider cannot be empty"));
        }
        if channel.is_empty() {
            return Err(CoreError::validation("channel cannot be empty"));
        }

        Ok(Self { provider, channel })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.channel)
    }
}

/// One message within one channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId {
    channel: ChannelId,
    message: String,
}

impl MessageId {
    pub fn new(channel: ChannelId, message: impl Into<String>) -> Result<Self, CoreError> {
        let message = message.into();
        if message.is_empty() {
            return Err(CoreError::validation("message id cannot be empty"));
        }

        Ok(Self { channel, message })
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel, self.message)
    }
}

/// A sending user as the messenger identifies them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId {
    provider: String,
    user: String,
}

impl UserId {
    pub fn new(provider: impl Into<String>, user: impl Into<String>) -> Result<Self, CoreError> {
        let provider = provider.into();
        let user = user.into();
        if provider.is_empty() {
            return Err(CoreError::validation("provider cannot be empty"));
        }
        if user.is_empty() {
            return Err(CoreError::validation("user cannot be empty"));
        }

        Ok(Self { provider, user })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

/// Bounded, non-empty message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageText {
    text: String,
}

impl MessageText {
    pub fn new(text: impl Into<String>) -> Result<Self, CoreError> {
        let text = text.into();
        if text.is_empty() {
            return Err(CoreError::validation("empty text"));
        }
        if text.len() > MAX_TEXT_LEN {
            return Err(CoreError::validation("text exceeds maximum length"));
        }

        Ok(Self { text })
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// An inbound update after decoding: who wrote what, where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    id: MessageId,
    from: UserId,
    text: Option<MessageText>,
}

impl InboundMessage {
    pub fn new(id: MessageId, from: UserId, text: Option<MessageText>) -> Self {
        Self { id, from, text }
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn from(&self) -> &UserId {
        &self.from
    }

    pub fn text(&self) -> Option<&MessageText> {
        self.text.as_ref()
    }
}
