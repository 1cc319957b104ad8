//! PulseWatch CLI - terminal client for the PulseWatch telemetry stream.
//!
//! Connects to a telemetry server, keeps a live copy of metrics, service
//! health and alerts, and renders it in the terminal. Useful for headless
//! monitoring, scripting (`--format json`) and debugging a server's event
//! stream.

mod commands;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{debug, info};

use pw_core::config::{AppConfig, ConfigHandle};
use pw_core::error::PulseResult;
use pw_core::logging;

/// PulseWatch - real-time telemetry and alert monitor.
#[derive(Parser)]
#[command(
    name = "pulsewatch",
    version,
    about = "PulseWatch telemetry client CLI",
    long_about = "A command-line client for a PulseWatch telemetry server.\n\
                  Streams system metrics, service health and alerts over a persistent socket connection."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Server address (overrides config).
    #[arg(short, long, global = true)]
    address: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and stream state changes until Ctrl+C.
    Watch {
        /// Also print every raw socket event as it arrives.
        #[arg(long)]
        raw: bool,
    },
    /// Connect, collect state for a while, print it and exit.
    Snapshot {
        /// Seconds to wait for the first metrics update.
        #[arg(short, long, default_value = "5")]
        wait: u64,
    },
    /// Inspect or write the configuration file.
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> PulseResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = match cli.config.as_deref() {
        Some(path) => PathBuf::from(path),
        None => AppConfig::default_config_path().unwrap_or_else(|_| PathBuf::from("config.toml")),
    };
    // `config init` may target a file that does not exist yet.
    let require_file = cli.config.is_some() && !matches!(cli.command, Commands::Config { .. });
    let mut config = load_config(&config_path, require_file)?;
    if let Some(address) = cli.address.as_deref() {
        config.server.address = AppConfig::sanitize_server_address(address);
    }

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

    info!("PulseWatch CLI v{}", pw_core::constants::APP_VERSION);
    debug!("config file: {}", config_path.display());

    let config_handle = ConfigHandle::new(config);

    // Dispatch to command handlers
    match cli.command {
        Commands::Watch { raw } => commands::watch::run(config_handle, raw, cli.format).await,
        Commands::Snapshot { wait } => {
            commands::snapshot::run(config_handle, wait, cli.format).await
        }
        Commands::Config { action } => {
            commands::config::run(config_handle, action, &config_path, cli.format).await
        }
    }
}

/// A required file must exist; otherwise a missing file means defaults.
fn load_config(path: &Path, required: bool) -> PulseResult<AppConfig> {
    if required || path.exists() {
        AppConfig::load_from_file(path)
    } else {
        Ok(AppConfig::default())
    }
}
