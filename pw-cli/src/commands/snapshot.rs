//! Snapshot command - connect briefly and print the collected state.

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use pw_core::config::ConfigHandle;
use pw_core::error::PulseResult;

use crate::OutputFormat;

/// Run the snapshot command.
pub async fn run(config: ConfigHandle, wait_secs: u64, format: OutputFormat) -> PulseResult<()> {
    let session = super::start_session(&config).await?;
    let address = session.manager().server_address().await;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(format!("Waiting for telemetry from {address}..."));
    pb.enable_steady_tick(Duration::from_millis(100));

    let mut updates = session.store().watch();
    // The watch guard must not outlive this statement; it blocks the store.
    let ready = tokio::time::timeout(
        Duration::from_secs(wait_secs),
        updates.wait_for(|s| s.is_connected() && s.metrics.is_some()),
    )
    .await
    .is_ok_and(|guard| guard.is_ok());
    pb.finish_and_clear();

    if !ready {
        warn!("no complete metrics within {wait_secs}s, printing partial state");
        if let OutputFormat::Text = format {
            println!(
                "  {} No metrics received within {wait_secs}s; showing what arrived.\n",
                style("WARN").yellow()
            );
        }
    }

    // Captured before shutdown so the printed connection state is the live one.
    let snapshot = session.snapshot();
    session.shutdown().await;

    match format {
        OutputFormat::Json => super::print_snapshot_json(&snapshot)?,
        OutputFormat::Text => super::print_snapshot_text(&snapshot),
    }
    Ok(())
}
