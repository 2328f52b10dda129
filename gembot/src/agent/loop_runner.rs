//! Responder loop - the core message processing engine.
//!
//! Consumes inbound messages from the bus, asks the generator for a reply
//! in the context of the sender's stored history, persists both turns, and
//! publishes the reply back to the originating channel.

use crate::bus::MessageBus;
use crate::error::Result;
use crate::events::{InboundMessage, OutboundMessage};
use crate::generate::Generator;
use crate::session::{SessionManager, Turn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Canned reply for an empty query (a bare mention).
const GREETING: &str = "How can I help you today?";

/// Canned reply when generation fails.
const APOLOGY: &str = "Sorry, I encountered an error processing your request.";

/// The responder loop processing messages from the bus.
pub struct AgentLoop {
    bus: MessageBus,
    generator: Arc<dyn Generator>,
    sessions: SessionManager,
    running: Arc<RwLock<bool>>,
}

impl std::fmt::Debug for AgentLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLoop")
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

impl AgentLoop {
    /// Create a new responder loop.
    pub fn new(bus: MessageBus, generator: Arc<dyn Generator>, sessions: SessionManager) -> Self {
        Self {
            bus,
            generator,
            sessions,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Run the loop, processing messages from the bus until stopped.
    pub async fn run(&self) -> Result<()> {
        *self.running.write().await = true;
        info!("responder loop started");

        while *self.running.read().await {
            let Some(msg) = self
                .bus
                .consume_inbound_timeout(Duration::from_secs(1))
                .await
            else {
                continue;
            };

            let response = self.process_message(&msg).await;
            if let Err(e) = self.bus.publish_outbound(response).await {
                error!(error = %e, "failed to publish response");
            }
        }

        info!("responder loop stopped");
        Ok(())
    }

    /// Stop the loop after the current message.
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// Check if the loop is running.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Process a single inbound message into its reply.
    ///
    /// Never fails: storage and generation errors degrade to canned
    /// replies so the process keeps serving.
    async fn process_message(&self, msg: &InboundMessage) -> OutboundMessage {
        debug!(
            channel = %msg.channel,
            sender = %msg.sender_id,
            "processing message"
        );

        // A bare mention carries no query; greet without touching history.
        if msg.content.is_empty() {
            return OutboundMessage::reply_to(msg, GREETING);
        }

        let user_id = msg.session_key().to_string();

        // Storage absence and corruption both surface here as an empty
        // session; only real IO failures reach the error arm.
        let session = match self.sessions.load(&user_id).await {
            Ok(session) => session,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "failed to load session");
                return OutboundMessage::reply_to(msg, APOLOGY);
            }
        };

        let reply = match self.generator.generate(session.turns(), &msg.content).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "generation failed");
                return OutboundMessage::reply_to(msg, APOLOGY);
            }
        };

        // Persist the exchange: user turn first, then the reply.
        if let Err(e) = self.sessions.append(&user_id, Turn::user(&msg.content)).await {
            error!(user_id = %user_id, error = %e, "failed to persist user turn");
        }
        if let Err(e) = self.sessions.append(&user_id, Turn::assistant(&reply)).await {
            error!(user_id = %user_id, error = %e, "failed to persist assistant turn");
        }

        OutboundMessage::reply_to(msg, reply)
    }
}
