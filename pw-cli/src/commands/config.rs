//! Config commands.

use std::path::Path;

use clap::Subcommand;
use console::style;
use dialoguer::{Confirm, Input, Password};

use pw_core::config::{AppConfig, ConfigHandle};
use pw_core::error::{PulseError, PulseResult};

use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration.
    Show,
    /// Write a configuration file, prompting for the server settings.
    Init {
        /// Overwrite an existing file without asking.
        #[arg(long)]
        force: bool,
    },
    /// Print the configuration file path.
    Path,
}

/// Run a config subcommand.
pub async fn run(
    config: ConfigHandle,
    action: ConfigAction,
    path: &Path,
    format: OutputFormat,
) -> PulseResult<()> {
    match action {
        ConfigAction::Show => {
            let cfg = config.snapshot().await;
            match format {
                OutputFormat::Json => {
                    let mut json = serde_json::to_value(&cfg)?;
                    json["server"]["auth_token"] = serde_json::json!(mask(&cfg.server.auth_token));
                    println!("{}", serde_json::to_string_pretty(&json)?);
                }
                OutputFormat::Text => print_config_text(&cfg, path),
            }
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                let overwrite = Confirm::new()
                    .with_prompt(format!("  {} exists. Overwrite?", path.display()))
                    .default(false)
                    .interact()
                    .unwrap_or(false);
                if !overwrite {
                    println!("  Init cancelled.");
                    return Ok(());
                }
            }

            let mut cfg = config.snapshot().await;
            let address: String = Input::new()
                .with_prompt("Server address")
                .with_initial_text(cfg.server.address.clone())
                .interact_text()
                .map_err(|e| PulseError::Other(e.into()))?;
            let token = Password::new()
                .with_prompt("Auth token (leave empty for none)")
                .allow_empty_password(true)
                .interact()
                .map_err(|e| PulseError::Other(e.into()))?;

            cfg.server.address = AppConfig::sanitize_server_address(&address);
            cfg.server.auth_token = token;
            cfg.validate()?;
            cfg.save_to_file(path)?;
            *config.write().await = cfg;

            println!("  {} Config saved to {}", style("OK").green(), path.display());
        }
        ConfigAction::Path => match format {
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "path": path.display().to_string() }))
            }
            OutputFormat::Text => println!("{}", path.display()),
        },
    }
    Ok(())
}

fn mask(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "********"
    }
}

fn print_config_text(cfg: &AppConfig, path: &Path) {
    println!("{}", style("File").bold().underlined());
    println!(
        "  {}{}",
        path.display(),
        if path.exists() { "" } else { " (not created, using defaults)" }
    );

    println!();
    println!("{}", style("Server").bold().underlined());
    println!("  server.address               {}", cfg.server.address);
    println!("  server.auth_token            {}", mask(&cfg.server.auth_token));
    println!("  server.connect_timeout_ms    {}", cfg.server.connect_timeout_ms);

    println!();
    println!("{}", style("Reconnect").bold().underlined());
    println!("  reconnect.base_delay_ms      {}", cfg.reconnect.base_delay_ms);
    println!("  reconnect.max_delay_ms       {}", cfg.reconnect.max_delay_ms);
    println!("  reconnect.jitter_factor      {}", cfg.reconnect.jitter_factor);

    println!();
    println!("{}", style("Store").bold().underlined());
    println!("  store.event_buffer           {}", cfg.store.event_buffer);
    println!("  store.command_buffer         {}", cfg.store.command_buffer);

    println!();
    println!("{}", style("Logging").bold().underlined());
    println!("  logging.level                {}", cfg.logging.level);
    println!(
        "  logging.directory            {}",
        if cfg.logging.directory.is_empty() { "(default)" } else { &cfg.logging.directory }
    );
    println!("  logging.json_output          {}", cfg.logging.json_output);
}
