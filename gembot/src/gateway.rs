//! Gateway service wiring the complete bot together.
//!
//! The gateway builds the session store, the Gemini generator, the message
//! bus, the channels, and (in serve mode) the HTTP webhook, then drives
//! the responder loop until shutdown.

use crate::agent::AgentLoop;
use crate::bus::MessageBus;
use crate::channel::ChannelManager;
use crate::channels::cli::run_interactive;
use crate::channels::{CliChannel, CliChannelConfig, SlackChannel, SlackChannelConfig};
use crate::config::BotConfig;
use crate::error::{BotError, ChannelError, ConfigError, Result};
use crate::generate::{GeminiGenerator, Generator};
use crate::server::{self, AppState};
use crate::session::{FileStorage, SessionConfig, SessionManager};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Gateway service running the configured surfaces.
#[derive(Debug)]
pub struct Gateway {
    config: BotConfig,
    enable_server: bool,
    enable_cli: bool,
    cli_config: CliChannelConfig,
}

impl Gateway {
    /// Create a gateway in serve mode (HTTP webhook + Slack delivery).
    #[must_use]
    pub fn new(config: BotConfig) -> Self {
        Self {
            config,
            enable_server: true,
            enable_cli: false,
            cli_config: CliChannelConfig::default(),
        }
    }

    /// Create a gateway in interactive demo mode (CLI only).
    #[must_use]
    pub fn interactive(config: BotConfig) -> Self {
        Self {
            config,
            enable_server: false,
            enable_cli: true,
            cli_config: CliChannelConfig::default(),
        }
    }

    /// Set the user id the demo conversation persists under.
    #[must_use]
    pub fn demo_user(mut self, user_id: impl Into<String>) -> Self {
        self.cli_config.user_id = user_id.into();
        self
    }

    /// Run the gateway until the responder loop stops, the server fails,
    /// or the interactive session ends.
    pub async fn run(&self) -> Result<()> {
        info!("gateway starting");

        let sessions = SessionManager::with_config(
            FileStorage::new(self.config.sessions.effective_dir()),
            SessionConfig {
                max_turns: self.config.sessions.max_turns,
            },
        );
        let generator: Arc<dyn Generator> =
            Arc::new(GeminiGenerator::new(self.config.gemini.clone()));

        let bus = MessageBus::new();
        let channel_manager = ChannelManager::new(bus.clone());

        let mut server_handle = None;
        if self.enable_server {
            let token = self
                .config
                .slack
                .bot_token
                .clone()
                .ok_or_else(|| ConfigError::missing("slack.bot_token"))?;
            let signing_secret = self
                .config
                .slack
                .signing_secret
                .clone()
                .ok_or_else(|| ConfigError::missing("slack.signing_secret"))?;

            let slack = SlackChannel::new(SlackChannelConfig::new(token));
            let bot_user_id = match slack.auth_test().await {
                Ok(identity) => {
                    info!(
                        bot_user_id = %identity.user_id,
                        team = %identity.team,
                        "slack token verified"
                    );
                    Some(identity.user_id)
                }
                Err(e) => {
                    warn!(error = %e, "auth.test failed; falling back to heuristic mention stripping");
                    None
                }
            };
            channel_manager.register(slack).await;

            let state = AppState {
                signing_secret,
                inbound: bus.inbound_handle(),
                sessions: sessions.clone(),
                bot_user_id,
            };
            let port = self.config.server.port;
            server_handle = Some(tokio::spawn(server::serve(state, port)));
        }

        let mut cli_handle = None;
        if self.enable_cli {
            channel_manager.register(CliChannel::new()).await;

            let bus_for_cli = bus.clone();
            let sessions_for_cli = sessions.clone();
            let cli_config = self.cli_config.clone();
            cli_handle = Some(tokio::spawn(async move {
                run_interactive(&bus_for_cli, &sessions_for_cli, cli_config).await
            }));
        }

        for result in channel_manager.start_all().await {
            if let Err(e) = result {
                error!(error = %e, "failed to start channel");
            }
        }

        let agent_loop = AgentLoop::new(bus.clone(), generator, sessions);
        info!("gateway started");

        let result = tokio::select! {
            result = agent_loop.run() => result,
            result = join_server(server_handle) => result,
            result = join_cli(cli_handle) => {
                info!("interactive session ended");
                result
            }
        };

        info!("gateway stopping");
        channel_manager.stop_all().await;

        let stats = bus.stats().await;
        info!(
            inbound = stats.inbound_count,
            outbound = stats.outbound_count,
            "gateway stopped"
        );

        result
    }
}

/// Await the server task, or park forever when no server was started so
/// the select branch stays inert.
async fn join_server(handle: Option<JoinHandle<Result<()>>>) -> Result<()> {
    match handle {
        Some(handle) => match handle.await {
            Ok(result) => result,
            Err(e) => Err(BotError::internal(format!("server task failed: {e}"))),
        },
        None => std::future::pending().await,
    }
}

/// Await the interactive session task, or park forever when not in demo
/// mode.
async fn join_cli(
    handle: Option<JoinHandle<std::result::Result<(), ChannelError>>>,
) -> Result<()> {
    match handle {
        Some(handle) => match handle.await {
            Ok(result) => result.map_err(BotError::from),
            Err(e) => Err(BotError::internal(format!("interactive task failed: {e}"))),
        },
        None => std::future::pending().await,
    }
}
