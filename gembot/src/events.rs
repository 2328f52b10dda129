//! Message events flowing between channels and the responder loop.

use crate::util::generate_message_id;
use serde::{Deserialize, Serialize};

/// An inbound message from a channel to the responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Unique message id.
    pub id: String,
    /// Channel identifier (e.g. "slack", "cli").
    pub channel: String,
    /// Sender's user identifier within the channel. Conversation history
    /// is keyed by this value.
    pub sender_id: String,
    /// Chat/conversation identifier replies should be routed to.
    pub chat_id: String,
    /// Thread identifier, when the message arrived inside a thread.
    pub thread_ts: Option<String>,
    /// Message text content.
    pub content: String,
    /// Unix-millisecond receive timestamp.
    pub timestamp: u64,
}

impl InboundMessage {
    /// Create a new inbound message with minimal required fields.
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_message_id(),
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            thread_ts: None,
            content: content.into(),
            timestamp: crate::util::timestamp_ms(),
        }
    }

    /// Set the thread the message arrived in.
    #[must_use]
    pub fn with_thread(mut self, thread_ts: impl Into<String>) -> Self {
        self.thread_ts = Some(thread_ts.into());
        self
    }

    /// The session key this conversation persists under: the sender's
    /// user id. One session per user, regardless of channel or thread.
    #[must_use]
    pub fn session_key(&self) -> &str {
        &self.sender_id
    }
}

/// An outbound message from the responder to a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Unique message id.
    pub id: String,
    /// Target channel identifier.
    pub channel: String,
    /// Target chat/conversation identifier.
    pub chat_id: String,
    /// Thread to reply into, if the inbound message was threaded.
    pub thread_ts: Option<String>,
    /// Message text content.
    pub content: String,
}

impl OutboundMessage {
    /// Create a new outbound message.
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_message_id(),
            channel: channel.into(),
            chat_id: chat_id.into(),
            thread_ts: None,
            content: content.into(),
        }
    }

    /// Create a reply to an inbound message, targeting the same channel,
    /// chat, and thread.
    pub fn reply_to(msg: &InboundMessage, content: impl Into<String>) -> Self {
        Self {
            id: generate_message_id(),
            channel: msg.channel.clone(),
            chat_id: msg.chat_id.clone(),
            thread_ts: msg.thread_ts.clone(),
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_message_creation() {
        let msg = InboundMessage::new("slack", "U123", "C456", "Hello!");
        assert_eq!(msg.channel, "slack");
        assert_eq!(msg.sender_id, "U123");
        assert_eq!(msg.chat_id, "C456");
        assert_eq!(msg.content, "Hello!");
        assert_eq!(msg.session_key(), "U123");
        assert!(msg.thread_ts.is_none());
    }

    #[test]
    fn test_outbound_reply_preserves_thread() {
        let inbound =
            InboundMessage::new("slack", "U123", "C456", "Hi").with_thread("1730000000.1000");
        let outbound = OutboundMessage::reply_to(&inbound, "Hello back!");

        assert_eq!(outbound.channel, "slack");
        assert_eq!(outbound.chat_id, "C456");
        assert_eq!(outbound.thread_ts.as_deref(), Some("1730000000.1000"));
    }
}
