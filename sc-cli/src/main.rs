//! Stream Client CLI - watch a real-time event stream from the terminal.
//!
//! Connects to the chat server's socket endpoint, keeps the connection alive
//! across network failures and prints state changes and events as they
//! arrive. Also manages the configuration file.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use sc_core::config::{AppConfig, ConfigHandle};
use sc_core::error::ScResult;
use sc_core::logging;

/// Stream Client - real-time chat event stream client.
#[derive(Parser)]
#[command(
    name = "streamchat",
    version,
    about = "Real-time chat event stream client",
    long_about = "Connects to a chat server's real-time endpoint and streams events to the terminal.\n\
                  The connection is kept alive with heartbeats and re-established automatically."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON lines for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the server and stream events until Ctrl+C.
    Connect {
        /// Server address (overrides config).
        #[arg(short, long)]
        address: Option<String>,
        /// API key (overrides config).
        #[arg(short = 'k', long)]
        api_key: Option<String>,
        /// User token (overrides config).
        #[arg(short, long)]
        token: Option<String>,
        /// Save the connection settings to the config file.
        #[arg(long)]
        save: bool,
    },
    /// Inspect and manage the configuration file.
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> ScResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = match cli.config {
        Some(path) => path,
        None => AppConfig::default_config_path()?,
    };
    let config = if config_path.exists() {
        AppConfig::load_from_file(&config_path)?
    } else {
        AppConfig::default()
    };

    // Initialize logging
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let log_dir = config
        .effective_log_dir()
        .unwrap_or_else(|_| PathBuf::from("logs"));
    let _guard = logging::init_logging(&log_level, &log_dir, config.logging.json_output)?;

    info!(
        "Stream Client CLI v{} on {}",
        sc_core::constants::APP_VERSION,
        std::env::consts::OS
    );

    let config_handle = ConfigHandle::new(config);

    match cli.command {
        Commands::Connect {
            address,
            api_key,
            token,
            save,
        } => {
            let overrides = commands::connect::ConnectArgs {
                address,
                api_key,
                token,
                save,
            };
            commands::connect::run(config_handle, config_path, overrides, cli.format).await
        }
        Commands::Config { action } => {
            commands::config::run(config_handle, config_path, action, cli.format).await
        }
    }
}
