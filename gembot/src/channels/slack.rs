//! Slack channel implementation over the Slack Web API.
//!
//! Inbound events arrive through the HTTP webhook (see [`crate::server`]);
//! this channel owns the outbound side: delivering replies with
//! `chat.postMessage` (threaded when the inbound message was threaded) and
//! verifying the bot token with `auth.test`.

use crate::bus::MessageBus;
use crate::channel::{Channel, ChannelBase, ChannelState, ChannelStatus};
use crate::error::{ChannelError, ChannelResult};
use crate::events::OutboundMessage;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info};

/// Default Slack Web API base URL.
const SLACK_API_BASE_URL: &str = "https://slack.com/api";

/// Slack channel configuration.
#[derive(Debug, Clone)]
pub struct SlackChannelConfig {
    /// Bot token (`xoxb-...`).
    pub token: String,
    /// Maximum message length before truncation.
    pub max_message_length: usize,
}

impl SlackChannelConfig {
    /// Create a new Slack channel config with the given token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            // chat.postMessage truncates past 40k characters; stay under it.
            max_message_length: 40_000,
        }
    }
}

/// Identity returned by `auth.test`.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackIdentity {
    /// The bot's own user id (`U...`).
    pub user_id: String,
    /// Workspace name.
    #[serde(default)]
    pub team: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    team: Option<String>,
}

/// The HTTP-calling half of the channel, cloned into the delivery task.
#[derive(Clone)]
struct SlackSender {
    config: SlackChannelConfig,
    api_base: String,
    client: reqwest::Client,
}

impl SlackSender {
    /// Verify the bot token and return the bot's identity.
    async fn auth_test(&self) -> ChannelResult<SlackIdentity> {
        let response = self
            .client
            .post(format!("{}/auth.test", self.api_base))
            .bearer_auth(&self.config.token)
            .send()
            .await
            .map_err(|e| ChannelError::AuthFailed(e.to_string()))?;

        let data: ApiResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::AuthFailed(format!("invalid response: {e}")))?;

        if !data.ok {
            return Err(ChannelError::AuthFailed(
                data.error.unwrap_or_else(|| "unknown".to_string()),
            ));
        }

        let user_id = data
            .user_id
            .ok_or_else(|| ChannelError::AuthFailed("auth.test missing user_id".to_string()))?;

        Ok(SlackIdentity {
            user_id,
            team: data.team.unwrap_or_default(),
        })
    }

    /// Post a message to a channel, threading it when `thread_ts` is set.
    async fn post_message(&self, msg: &OutboundMessage) -> ChannelResult<()> {
        let text = crate::util::truncate_str(&msg.content, self.config.max_message_length);

        let mut body = json!({
            "channel": msg.chat_id,
            "text": text,
        });
        if let Some(thread_ts) = &msg.thread_ts {
            body["thread_ts"] = json!(thread_ts);
        }

        let response = self
            .client
            .post(format!("{}/chat.postMessage", self.api_base))
            .bearer_auth(&self.config.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::send(e.to_string()))?;

        let data: ApiResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::send(format!("invalid response: {e}")))?;

        if !data.ok {
            return Err(ChannelError::send(
                data.error.unwrap_or_else(|| "unknown".to_string()),
            ));
        }

        Ok(())
    }
}

/// Slack channel implementation.
pub struct SlackChannel {
    base: ChannelBase,
    sender: SlackSender,
    shutdown_tx: RwLock<Option<mpsc::Sender<()>>>,
}

impl std::fmt::Debug for SlackChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackChannel")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl SlackChannel {
    /// Create a new Slack channel with the given configuration.
    #[must_use]
    pub fn new(config: SlackChannelConfig) -> Self {
        Self {
            base: ChannelBase::new("slack"),
            sender: SlackSender {
                config,
                api_base: SLACK_API_BASE_URL.to_string(),
                client: reqwest::Client::new(),
            },
            shutdown_tx: RwLock::new(None),
        }
    }

    /// Override the Web API base URL (used by tests).
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.sender.api_base = api_base.into();
        self
    }

    /// Verify the bot token and return the bot's identity.
    pub async fn auth_test(&self) -> ChannelResult<SlackIdentity> {
        self.sender.auth_test().await
    }
}

#[async_trait]
impl Channel for SlackChannel {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn start(&self, bus: &MessageBus) -> ChannelResult<()> {
        self.base.set_state(ChannelState::Starting).await;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.write().await = Some(shutdown_tx);

        // Subscribe to outbound messages and deliver them via the Web API.
        let mut outbound_rx = bus.subscribe_channel("slack").await;
        let sender = self.sender.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(msg) = outbound_rx.recv() => {
                        if let Err(e) = sender.post_message(&msg).await {
                            error!(chat_id = %msg.chat_id, error = %e, "failed to send slack message");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("slack output handler shutting down");
                        break;
                    }
                }
            }
        });

        self.base.set_state(ChannelState::Running).await;
        info!("Slack channel started");

        Ok(())
    }

    async fn stop(&self) -> ChannelResult<()> {
        self.base.set_state(ChannelState::Stopping).await;

        {
            let guard = self.shutdown_tx.write().await;
            if let Some(tx) = &*guard {
                let _ = tx.send(()).await;
            }
        }

        self.base.set_state(ChannelState::Stopped).await;
        info!("Slack channel stopped");

        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> ChannelResult<()> {
        self.sender.post_message(msg).await?;
        self.base.record_sent().await;
        Ok(())
    }

    async fn status(&self) -> ChannelStatus {
        self.base.build_status().await
    }
}
