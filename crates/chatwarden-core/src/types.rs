use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = u64;
pub type ChatId = u64;

/// A channel inside a chat. Platforms without sub-channels use the chat id
/// for both fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRef {
    pub chat_id: ChatId,
    pub channel_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel: ChannelRef,
    pub message_id: u64,
}

impl MessageRef {
    pub fn chat_id(&self) -> ChatId {
        self.channel.chat_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message: MessageRef,
    pub sender_id: UserId,
    pub text: String,
    pub is_command: bool,
    /// Set when the transport already knows the sender's role; `None` defers
    /// the check to the chat-action collaborator.
    pub sender_is_admin: Option<bool>,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(message: MessageRef, sender_id: UserId, text: impl Into<String>, prefix: &str) -> Self {
        let text = text.into();
        let is_command = !prefix.is_empty() && text.starts_with(prefix);
        Self {
            message,
            sender_id,
            text,
            is_command,
            sender_is_admin: None,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandInvocation {
    pub message: MessageRef,
    pub sender_id: UserId,
    pub text: String,
    pub reply_to_sender: Option<UserId>,
}
