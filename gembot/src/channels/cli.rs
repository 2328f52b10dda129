//! Command-line channel: the interactive demo.
//!
//! Reads from stdin and writes to stdout, persisting the conversation
//! under a demo user id through the same session store the Slack surface
//! uses.

use crate::bus::MessageBus;
use crate::channel::{Channel, ChannelBase, ChannelState, ChannelStatus};
use crate::error::{ChannelError, ChannelResult};
use crate::events::{InboundMessage, OutboundMessage};
use crate::session::SessionManager;
use async_trait::async_trait;
use std::io::{self, Write};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

/// CLI channel configuration.
#[derive(Debug, Clone)]
pub struct CliChannelConfig {
    /// Prompt string displayed before user input.
    pub prompt: String,
    /// User id the demo conversation persists under.
    pub user_id: String,
}

impl Default for CliChannelConfig {
    fn default() -> Self {
        Self {
            prompt: "You: ".to_string(),
            user_id: "demo_user".to_string(),
        }
    }
}

impl CliChannelConfig {
    /// Create a new CLI channel config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the prompt string.
    #[must_use]
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Set the demo user id.
    #[must_use]
    pub fn user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = id.into();
        self
    }
}

/// Command-line interface channel (output side).
#[derive(Debug)]
pub struct CliChannel {
    base: ChannelBase,
    shutdown_tx: RwLock<Option<mpsc::Sender<()>>>,
}

impl CliChannel {
    /// Create a new CLI channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: ChannelBase::new("cli"),
            shutdown_tx: RwLock::new(None),
        }
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn start(&self, bus: &MessageBus) -> ChannelResult<()> {
        self.base.set_state(ChannelState::Starting).await;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.write().await = Some(shutdown_tx);

        let mut outbound_rx = bus.subscribe_channel("cli").await;

        #[allow(clippy::print_stdout)] // CLI channel intentionally prints to stdout
        let _output_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(msg) = outbound_rx.recv() => {
                        println!("\n{}\n", msg.content);
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("CLI output handler shutting down");
                        break;
                    }
                }
            }
        });

        self.base.set_state(ChannelState::Running).await;
        info!("CLI channel started");

        Ok(())
    }

    async fn stop(&self) -> ChannelResult<()> {
        self.base.set_state(ChannelState::Stopping).await;

        let guard = self.shutdown_tx.write().await;
        if let Some(tx) = &*guard {
            let _ = tx.send(()).await;
        }
        drop(guard);

        self.base.set_state(ChannelState::Stopped).await;
        info!("CLI channel stopped");

        Ok(())
    }

    #[allow(clippy::print_stdout)] // CLI channel intentionally prints to stdout
    async fn send(&self, msg: &OutboundMessage) -> ChannelResult<()> {
        println!("\n{}\n", msg.content);
        self.base.record_sent().await;
        Ok(())
    }

    async fn status(&self) -> ChannelStatus {
        self.base.build_status().await
    }
}

/// Run the interactive demo session (input side).
///
/// Blocks reading stdin: `exit`/`quit` ends the session, `clear` wipes the
/// demo user's stored history, anything else is published to the bus and
/// answered asynchronously through the registered [`CliChannel`].
#[allow(clippy::print_stdout)] // interactive demo intentionally prints to stdout
pub async fn run_interactive(
    bus: &MessageBus,
    sessions: &SessionManager,
    config: CliChannelConfig,
) -> ChannelResult<()> {
    let prompt = config.prompt.clone();

    println!("Gembot demo | type 'exit' to quit, 'clear' to wipe history\n");

    let session = sessions
        .load(&config.user_id)
        .await
        .map_err(|e| ChannelError::Internal(e.to_string()))?;
    if !session.is_empty() {
        println!(
            "Loaded existing history with {} previous turns.\n",
            session.turns().len()
        );
    }

    loop {
        print!("{prompt}");
        let _ = io::stdout().flush();

        // Read one line per iteration; the stdin lock must not be held
        // across await points inside a spawned task.
        let mut line = String::new();
        let read = io::stdin()
            .read_line(&mut line)
            .map_err(|e| ChannelError::Internal(e.to_string()))?;
        if read == 0 {
            break;
        }

        let trimmed = line.trim();
        match trimmed {
            "exit" | "quit" => break,
            "clear" => {
                sessions
                    .clear(&config.user_id)
                    .await
                    .map_err(|e| ChannelError::Internal(e.to_string()))?;
                println!("History cleared.");
                continue;
            }
            "" => continue,
            _ => {}
        }

        let msg = InboundMessage::new("cli", &config.user_id, "direct", trimmed);
        bus.publish_inbound(msg)
            .await
            .map_err(|e| ChannelError::Internal(e.to_string()))?;
    }

    Ok(())
}
