//! Gembot - a Slack chatbot backed by Google Gemini.
//!
//! The bot relays user messages to the Gemini API and replies with the
//! generated text, keeping a bounded per-user conversation history in flat
//! JSON files.
//!
//! # Architecture
//!
//! - **HTTP surface** ([`server`]) - Slack events webhook, history-clear
//!   and health endpoints
//! - **Message bus** ([`bus`]) - async hand-off between surfaces and the
//!   responder
//! - **Channels** ([`channels`]) - Slack Web API delivery, CLI demo
//! - **Responder** ([`agent`]) - load history, generate, persist, reply
//! - **Generation** ([`generate`]) - Gemini client with model fallback
//! - **Sessions** ([`session`]) - bounded per-user history persistence
//! - **Gateway** ([`gateway`]) - wires everything per run mode

pub mod agent;
pub mod bus;
pub mod channel;
pub mod channels;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod generate;
pub mod server;
pub mod session;
pub mod util;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{
        BotError, BusError, BusResult, ChannelError, ChannelResult, ConfigError, ConfigResult,
        Result, StorageError, StorageResult,
    };

    pub use crate::agent::AgentLoop;

    pub use crate::bus::{InboundHandle, MessageBus};

    pub use crate::channel::{Channel, ChannelManager, ChannelState, ChannelStatus};
    pub use crate::channels::{
        CliChannel, CliChannelConfig, SlackChannel, SlackChannelConfig, SlackIdentity,
    };

    pub use crate::config::{
        BotConfig, ConfigIssue, GeminiConfig, IssueLevel, ServerConfig, SessionsConfig,
        SlackConfig, config_path, init_config, load_config, save_config,
    };

    pub use crate::events::{InboundMessage, OutboundMessage};

    pub use crate::gateway::Gateway;

    pub use crate::generate::{GenerateError, GenerateResult, GeminiGenerator, Generator};

    pub use crate::server::{AppState, router, verify_signature};

    pub use crate::session::{
        FileStorage, MemoryStorage, Role, Session, SessionConfig, SessionManager, SessionStorage,
        Turn,
    };

    pub use crate::util::{generate_message_id, sessions_dir, timestamp_ms, truncate_str};
}
