//! Typed inbound events from the messaging platform.

use serde::{Deserialize, Serialize};

/// A text message posted in a channel or thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Message ID
    pub id: String,
    /// Channel or thread the message was posted in
    pub channel_id: String,
    /// Guild the channel belongs to, if any
    #[serde(default)]
    pub guild_id: Option<String>,
    /// Author
    pub user_id: String,
    /// Message text
    pub text: String,
    /// Timestamp (Unix millis)
    pub timestamp: i64,
}

/// An acknowledgment (reaction) added to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEvent {
    /// Who reacted
    pub actor_id: String,
    /// Which message was reacted to
    pub message_id: String,
    /// Channel or thread holding the message
    pub channel_id: String,
}

impl ReactionEvent {
    pub fn new(
        actor_id: impl Into<String>,
        message_id: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            message_id: message_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

/// Everything the bot reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundEvent {
    Message(ChannelMessage),
    Reaction(ReactionEvent),
}

impl InboundEvent {
    /// Channel the event happened in.
    pub fn channel_id(&self) -> &str {
        match self {
            Self::Message(msg) => &msg.channel_id,
            Self::Reaction(reaction) => &reaction.channel_id,
        }
    }
}
