//! Async message bus decoupling channels from the responder loop.
//!
//! Channels publish inbound messages; the responder loop consumes them and
//! publishes outbound replies, which are routed to the subscriber of the
//! target channel.

use crate::error::{BusError, BusResult};
use crate::events::{InboundMessage, OutboundMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace};

/// Default capacity for message queues.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Async message bus connecting channels and the responder loop.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<MessageBusInner>,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus").finish_non_exhaustive()
    }
}

struct MessageBusInner {
    /// Inbound message queue (channels → responder).
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: RwLock<Option<mpsc::Receiver<InboundMessage>>>,

    /// Channel-specific subscribers for outbound delivery.
    channel_subscribers: RwLock<HashMap<String, Vec<mpsc::Sender<OutboundMessage>>>>,

    /// Statistics.
    stats: RwLock<BusStats>,
}

/// Message bus statistics.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusStats {
    /// Total inbound messages processed.
    pub inbound_count: u64,
    /// Total outbound messages processed.
    pub outbound_count: u64,
}

impl MessageBus {
    /// Create a new message bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a new message bus with the given queue capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);

        Self {
            inner: Arc::new(MessageBusInner {
                inbound_tx,
                inbound_rx: RwLock::new(Some(inbound_rx)),
                channel_subscribers: RwLock::new(HashMap::new()),
                stats: RwLock::new(BusStats::default()),
            }),
        }
    }

    /// Publish an inbound message from a channel to the responder.
    pub async fn publish_inbound(&self, msg: InboundMessage) -> BusResult<()> {
        trace!(
            channel = %msg.channel,
            sender = %msg.sender_id,
            "publishing inbound message"
        );

        self.inner
            .inbound_tx
            .send(msg)
            .await
            .map_err(|_| BusError::InboundClosed)?;

        self.inner.stats.write().await.inbound_count += 1;
        Ok(())
    }

    /// Consume the next inbound message.
    ///
    /// This should only be called by the responder loop. Returns `None`
    /// when the bus is closed.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        let mut rx_guard = self.inner.inbound_rx.write().await;
        match rx_guard.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Try to consume the next inbound message within a timeout.
    ///
    /// Returns `None` if no message arrives before the timeout.
    pub async fn consume_inbound_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Option<InboundMessage> {
        let mut rx_guard = self.inner.inbound_rx.write().await;
        match rx_guard.as_mut() {
            Some(rx) => tokio::time::timeout(timeout, rx.recv())
                .await
                .ok()
                .flatten(),
            None => None,
        }
    }

    /// Publish an outbound message to the target channel's subscribers.
    pub async fn publish_outbound(&self, msg: OutboundMessage) -> BusResult<()> {
        trace!(
            channel = %msg.channel,
            chat_id = %msg.chat_id,
            "publishing outbound message"
        );

        let subscribers = self.inner.channel_subscribers.read().await;
        if let Some(senders) = subscribers.get(&msg.channel) {
            for sender in senders {
                if sender.send(msg.clone()).await.is_err() {
                    debug!(channel = %msg.channel, "channel subscriber disconnected");
                }
            }
        } else {
            debug!(channel = %msg.channel, "no subscriber for outbound channel");
        }
        drop(subscribers);

        self.inner.stats.write().await.outbound_count += 1;
        Ok(())
    }

    /// Subscribe to outbound messages for a specific channel.
    pub async fn subscribe_channel(&self, channel: &str) -> mpsc::Receiver<OutboundMessage> {
        let (tx, rx) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);

        let mut subscribers = self.inner.channel_subscribers.write().await;
        subscribers.entry(channel.to_string()).or_default().push(tx);

        debug!(channel = %channel, "new channel subscriber registered");
        rx
    }

    /// Get current bus statistics.
    pub async fn stats(&self) -> BusStats {
        *self.inner.stats.read().await
    }

    /// Create a lightweight handle for publishing inbound messages.
    ///
    /// Useful for the HTTP surface, which only ever enqueues.
    pub fn inbound_handle(&self) -> InboundHandle {
        InboundHandle {
            tx: self.inner.inbound_tx.clone(),
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Lightweight handle for publishing inbound messages.
#[derive(Debug, Clone)]
pub struct InboundHandle {
    tx: mpsc::Sender<InboundMessage>,
}

impl InboundHandle {
    /// Publish an inbound message.
    pub async fn publish(&self, msg: InboundMessage) -> BusResult<()> {
        self.tx.send(msg).await.map_err(|_| BusError::InboundClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inbound_message_flow() {
        let bus = MessageBus::new();

        let msg = InboundMessage::new("test", "sender1", "chat1", "Hello");
        bus.publish_inbound(msg).await.unwrap();

        let received = bus
            .consume_inbound_timeout(std::time::Duration::from_millis(100))
            .await;
        assert!(received.is_some());
        assert_eq!(received.unwrap().content, "Hello");
    }

    #[tokio::test]
    async fn test_channel_subscription_is_targeted() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe_channel("slack").await;

        let msg1 = OutboundMessage::new("slack", "chat1", "For Slack");
        bus.publish_outbound(msg1).await.unwrap();

        // Message to another channel must not be delivered here.
        let msg2 = OutboundMessage::new("cli", "chat2", "For CLI");
        bus.publish_outbound(msg2).await.unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv())
            .await
            .unwrap();

        assert!(received.is_some());
        assert_eq!(received.unwrap().content, "For Slack");
    }

    #[tokio::test]
    async fn test_inbound_handle() {
        let bus = MessageBus::new();
        let handle = bus.inbound_handle();

        handle
            .publish(InboundMessage::new("test", "s", "c", "via handle"))
            .await
            .unwrap();

        let received = bus
            .consume_inbound_timeout(std::time::Duration::from_millis(100))
            .await;
        assert_eq!(received.unwrap().content, "via handle");
    }

    #[tokio::test]
    async fn test_stats() {
        let bus = MessageBus::new();

        bus.publish_inbound(InboundMessage::new("test", "s", "c", "in"))
            .await
            .unwrap();
        bus.publish_outbound(OutboundMessage::new("test", "c", "out"))
            .await
            .unwrap();

        let stats = bus.stats().await;
        assert_eq!(stats.inbound_count, 1);
        assert_eq!(stats.outbound_count, 1);
    }
}
