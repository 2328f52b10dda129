//! Bot configuration: JSON file plus environment overrides.
//!
//! The configuration lives at `~/.gembot/config.json`. Credentials are
//! usually supplied through the environment (`GOOGLE_API_KEY`,
//! `SLACK_BOT_TOKEN`, `SLACK_SIGNING_SECRET`), which always takes
//! precedence over file contents.

use crate::error::{ConfigError, ConfigResult};
use crate::util;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Default system instruction, tuned for chat-style replies.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "Keep your responses simple, short, and conversational like a Slack chat. Avoid lengthy explanations. Be direct and concise.";

/// Top-level bot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Slack credentials.
    pub slack: SlackConfig,
    /// Gemini generation settings.
    pub gemini: GeminiConfig,
    /// Session storage settings.
    pub sessions: SessionsConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port the events webhook listens on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// Slack credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    /// Bot token (`xoxb-...`) for the Web API.
    pub bot_token: Option<String>,
    /// Signing secret for verifying event requests.
    pub signing_secret: Option<String>,
}

/// Gemini generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// API key for the generative-language service.
    pub api_key: Option<String>,
    /// Preferred model identifier.
    pub model: String,
    /// Ordered fallback models tried when the preferred one is
    /// unavailable.
    pub fallback_models: Vec<String>,
    /// System instruction sent with every request.
    pub system_instruction: String,
    /// Whether to ground replies with web search.
    pub web_search: bool,
    /// How many of the most recent history turns go into the prompt.
    pub history_window: usize,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.0-flash-lite".to_string(),
            fallback_models: vec![
                "gemini-2.0-flash".to_string(),
                "gemini-1.5-flash".to_string(),
                "gemini-1.5-pro".to_string(),
            ],
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            web_search: false,
            history_window: 20,
        }
    }
}

/// Session storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Directory for per-user session files. Defaults to
    /// `~/.gembot/sessions`.
    pub dir: Option<PathBuf>,
    /// Maximum turns kept per session.
    pub max_turns: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_turns: 100,
        }
    }
}

impl SessionsConfig {
    /// The effective session directory.
    #[must_use]
    pub fn effective_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(util::sessions_dir)
    }
}

/// Severity of a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    /// The configuration cannot be used.
    Error,
    /// The configuration is usable but suspicious.
    Warning,
}

/// A single configuration issue found by validation.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    /// Severity.
    pub level: IssueLevel,
    /// Human-readable description.
    pub message: String,
}

impl ConfigIssue {
    fn error(message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            message: message.into(),
        }
    }
}

impl BotConfig {
    /// Apply environment-variable overrides on top of file contents.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("GOOGLE_API_KEY")
            && !key.is_empty()
        {
            self.gemini.api_key = Some(key);
        }
        if let Ok(token) = std::env::var("SLACK_BOT_TOKEN")
            && !token.is_empty()
        {
            self.slack.bot_token = Some(token);
        }
        if let Ok(secret) = std::env::var("SLACK_SIGNING_SECRET")
            && !secret.is_empty()
        {
            self.slack.signing_secret = Some(secret);
        }
        if let Ok(port) = std::env::var("PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
        }
        if let Ok(model) = std::env::var("GEMBOT_MODEL")
            && !model.is_empty()
        {
            self.gemini.model = model;
        }
    }

    /// Validate the configuration.
    ///
    /// `for_serve` additionally requires the Slack credentials the events
    /// webhook needs; `chat` and `check` only need the API key.
    #[must_use]
    pub fn validate(&self, for_serve: bool) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self
            .gemini
            .api_key
            .as_deref()
            .is_none_or(|k| k.is_empty())
        {
            issues.push(ConfigIssue::error(
                "Gemini API key is not configured (set GOOGLE_API_KEY)",
            ));
        }
        if self.gemini.model.is_empty() {
            issues.push(ConfigIssue::error("preferred model is empty"));
        }
        if self.gemini.fallback_models.is_empty() {
            issues.push(ConfigIssue::warning(
                "no fallback models configured; a model outage will not be recovered",
            ));
        }

        if for_serve {
            if self
                .slack
                .bot_token
                .as_deref()
                .is_none_or(|t| t.is_empty())
            {
                issues.push(ConfigIssue::error(
                    "Slack bot token is not configured (set SLACK_BOT_TOKEN)",
                ));
            }
            if self
                .slack
                .signing_secret
                .as_deref()
                .is_none_or(|s| s.is_empty())
            {
                issues.push(ConfigIssue::error(
                    "Slack signing secret is not configured (set SLACK_SIGNING_SECRET)",
                ));
            }
        }

        if self.sessions.max_turns == 0 {
            issues.push(ConfigIssue::warning(
                "sessions.max_turns is 0; no history will be kept",
            ));
        }

        issues
    }

    /// Whether validation found any hard errors.
    #[must_use]
    pub fn has_errors(issues: &[ConfigIssue]) -> bool {
        issues.iter().any(|i| i.level == IssueLevel::Error)
    }
}

/// Default path of the configuration file.
#[must_use]
pub fn config_path() -> PathBuf {
    util::config_path()
}

/// Load configuration from the given path (or the default path), then
/// apply environment overrides. A missing file yields the defaults.
pub async fn load_config(path: Option<&PathBuf>) -> ConfigResult<BotConfig> {
    let path = path.cloned().unwrap_or_else(config_path);

    let mut config = if path.exists() {
        let content = tokio::fs::read_to_string(&path).await?;
        debug!(path = %path.display(), "loaded configuration file");
        serde_json::from_str(&content)?
    } else {
        debug!(path = %path.display(), "no configuration file, using defaults");
        BotConfig::default()
    };

    config.apply_env_overrides();
    Ok(config)
}

/// Persist the configuration to the default path.
pub async fn save_config(config: &BotConfig) -> ConfigResult<()> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(&path, content).await?;
    Ok(())
}

/// Write a default configuration file if none exists.
pub async fn init_config() -> ConfigResult<()> {
    let path = config_path();
    if path.exists() {
        return Err(ConfigError::Invalid(format!(
            "configuration already exists at {}",
            path.display()
        )));
    }
    save_config(&BotConfig::default()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BotConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.gemini.model, "gemini-2.0-flash-lite");
        assert!(!config.gemini.fallback_models.is_empty());
        assert_eq!(config.sessions.max_turns, 100);
        assert!(!config.gemini.web_search);
    }

    #[test]
    fn test_validate_requires_api_key() {
        let config = BotConfig::default();
        let issues = config.validate(false);
        assert!(BotConfig::has_errors(&issues));
    }

    #[test]
    fn test_validate_serve_requires_slack_credentials() {
        let mut config = BotConfig::default();
        config.gemini.api_key = Some("key".to_string());

        assert!(!BotConfig::has_errors(&config.validate(false)));
        assert!(BotConfig::has_errors(&config.validate(true)));

        config.slack.bot_token = Some("xoxb-token".to_string());
        config.slack.signing_secret = Some("secret".to_string());
        assert!(!BotConfig::has_errors(&config.validate(true)));
    }

    #[test]
    fn test_partial_file_round_trip() {
        // A sparse file only overrides what it names.
        let parsed: BotConfig =
            serde_json::from_str(r#"{ "gemini": { "model": "gemini-x" } }"#).unwrap();
        assert_eq!(parsed.gemini.model, "gemini-x");
        assert_eq!(parsed.server.port, 3000);
        assert_eq!(parsed.gemini.history_window, 20);
    }
}
