//! Gembot CLI - Slack ↔ Gemini relay bot.

#![allow(clippy::print_stdout)] // CLI program intentionally uses stdout

use clap::{Args, Parser, Subcommand};
use gembot::channels::{SlackChannel, SlackChannelConfig};
use gembot::config::{self, BotConfig, IssueLevel};
use gembot::error::{BotError, Result};
use gembot::gateway::Gateway;
use gembot::generate::GeminiGenerator;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Gembot - a Slack chatbot backed by Google Gemini
#[derive(Parser)]
#[command(name = "gembot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, env = "GEMBOT_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Slack events server
    Serve(ServeArgs),

    /// Start an interactive demo chat
    Chat(ChatArgs),

    /// Check connectivity to Slack and Gemini
    Check,
}

/// Arguments for the serve command
#[derive(Args)]
struct ServeArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,
}

/// Arguments for the chat command
#[derive(Args)]
struct ChatArgs {
    /// Model to use (overrides config)
    #[arg(short = 'M', long, env = "GEMBOT_MODEL")]
    model: Option<String>,

    /// User id the demo conversation persists under
    #[arg(short, long, default_value = "demo_user")]
    user: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");

    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging with the given verbosity level.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "gembot={level},{}",
            if verbosity >= 2 { "debug" } else { "warn" }
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve(args) => cmd_serve(args, cli.config).await,
        Commands::Chat(args) => cmd_chat(args, cli.config).await,
        Commands::Check => cmd_check(cli.config).await,
    }
}

/// Load configuration and fail on validation errors.
async fn load_checked(path: Option<&PathBuf>, for_serve: bool) -> Result<BotConfig> {
    let config = config::load_config(path).await?;

    let issues = config.validate(for_serve);
    for issue in &issues {
        match issue.level {
            IssueLevel::Error => tracing::error!("{}", issue.message),
            IssueLevel::Warning => tracing::warn!("{}", issue.message),
        }
    }
    if BotConfig::has_errors(&issues) {
        return Err(BotError::config("configuration is incomplete"));
    }

    Ok(config)
}

/// Run the Slack events server.
async fn cmd_serve(args: ServeArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut config = load_checked(config_path.as_ref(), true).await?;

    if let Some(port) = args.port {
        config.server.port = port;
    }

    let gateway = Gateway::new(config);

    println!("Gembot serving. Press Ctrl+C to stop.\n");

    tokio::select! {
        result = gateway.run() => result,
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
            Ok(())
        }
    }
}

/// Start the interactive demo chat.
async fn cmd_chat(args: ChatArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut config = load_checked(config_path.as_ref(), false).await?;

    if let Some(model) = args.model {
        config.gemini.model = model;
    }
    println!("Using user id: {}", args.user);

    let gateway = Gateway::interactive(config).demo_user(args.user);

    tokio::select! {
        result = gateway.run() => result,
        _ = tokio::signal::ctrl_c() => {
            println!("\nBye.");
            Ok(())
        }
    }
}

/// Check connectivity to Slack and Gemini.
async fn cmd_check(config_path: Option<PathBuf>) -> Result<()> {
    let config = config::load_config(config_path.as_ref()).await?;

    println!("Gembot connectivity check\n");

    // Slack: only checked when a token is configured.
    match &config.slack.bot_token {
        Some(token) if !token.is_empty() => {
            println!("Slack token length: {}", token.len());
            let channel = SlackChannel::new(SlackChannelConfig::new(token.clone()));
            match channel.auth_test().await {
                Ok(identity) => {
                    println!("Slack:  ok (bot {} in team {})", identity.user_id, identity.team);
                }
                Err(e) => println!("Slack:  FAILED ({e})"),
            }
        }
        _ => println!("Slack:  skipped (no SLACK_BOT_TOKEN)"),
    }

    // Gemini: one-shot generation, walking the fallback list if needed.
    let generator = GeminiGenerator::new(config.gemini.clone());
    match generator.probe().await {
        Ok((model, text)) => {
            println!("Gemini: ok (model {model})");
            println!("        {}", gembot::util::truncate_str(text.trim(), 120));
            Ok(())
        }
        Err(e) => {
            println!("Gemini: FAILED ({e})");
            Err(BotError::internal(format!("connectivity check failed: {e}")))
        }
    }
}
