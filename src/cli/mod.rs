//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod chat;
pub mod config;
pub mod render;
pub mod say;

use std::error::Error;
use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::clients::{build_client, Platform};
use crate::core::config::UserConfig;
use crate::core::orchestrator::{ExchangeEvent, Orchestrator};
use crate::tools::builtin::default_registry;

#[derive(Parser)]
#[command(name = "llamaman")]
#[command(about = "Chat with a Llama model that can call local tools")]
#[command(
    long_about = "llamaman streams replies from a local Ollama server, AWS Bedrock, or Anthropic \
and lets the model call a small set of local tools (arithmetic and workspace file access) \
in a multi-step loop.\n\n\
Credentials:\n\
  AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY or ~/.aws/credentials   for --platform aws\n\
  ANTHROPIC_API_KEY                                                 for --platform anthropic\n\n\
Environment Variables:\n\
  LLAMAMAN_CONFIG   Path of the configuration file to use\n\
  RUST_LOG          Diagnostic log filter (default: warn)\n\n\
Chat commands:\n\
  /clear            Start over with only the system prompt\n\
  /tools            List the available tools\n\
  /log <filename>   Enable logging to specified file\n\
  /log              Toggle logging pause/resume\n\
  /quit             Leave the chat\n\
  Ctrl+C            Abort the reply in progress, or quit when idle"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Backend to use (ollama, aws, anthropic)
    #[arg(short = 'p', long, global = true, value_name = "PLATFORM")]
    pub platform: Option<Platform>,

    /// Model id, overriding the configured one
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Maximum tool invocations per exchange
    #[arg(long, global = true, value_name = "N")]
    pub max_steps: Option<NonZeroUsize>,

    /// Enable logging to specified file
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive chat (default)
    Chat,
    /// Send one message, print the reply, and exit
    Say {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        prompt: Vec<String>,
    },
    /// List the tools the model can call
    Tools,
    /// Show or change configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommand>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print every setting (default)
    Show,
    /// Print the configuration file location
    Path,
    /// Set a configuration value
    Set {
        key: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        value: Vec<String>,
    },
    /// Restore a configuration value to its default
    Unset { key: String },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tokio::runtime::Runtime::new()?.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    match args.command {
        Some(Commands::Config { ref action }) => config::run(action.as_ref()),
        Some(Commands::Tools) => {
            let config = effective_config(&args)?;
            let registry = default_registry(config.resolved_workspace_dir()?);
            chat::print_tools(&registry);
            Ok(())
        }
        Some(Commands::Say { ref prompt }) => say::run_say(&args, &prompt.join(" ")).await,
        Some(Commands::Chat) | None => chat::run_chat(&args).await,
    }
}

/// Stored configuration with command-line overrides applied.
pub(crate) fn effective_config(args: &Args) -> Result<UserConfig, Box<dyn Error>> {
    Ok(apply_overrides(UserConfig::load()?, args))
}

fn apply_overrides(mut config: UserConfig, args: &Args) -> UserConfig {
    if let Some(platform) = args.platform {
        if platform != config.platform {
            // A model id chosen for one platform is meaningless on another.
            config.model = None;
        }
        config.platform = platform;
    }
    if let Some(model) = &args.model {
        config.model = Some(model.clone());
    }
    if let Some(max_steps) = args.max_steps {
        config.max_steps = max_steps.get();
    }
    config
}

/// Build the orchestrator for `config`, publishing events on the returned channel.
pub(crate) fn start_session(
    config: &UserConfig,
) -> Result<(Orchestrator, mpsc::UnboundedReceiver<ExchangeEvent>), Box<dyn Error>> {
    let client = build_client(config)?;
    let workspace = config.resolved_workspace_dir()?;
    std::fs::create_dir_all(&workspace)?;
    tracing::debug!(
        platform = %client.platform(),
        model = client.model(),
        workspace = %workspace.display(),
        "Session started"
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::new(
        client,
        default_registry(workspace),
        config.max_steps,
    )
    .with_events(tx);
    Ok((orchestrator, rx))
}
