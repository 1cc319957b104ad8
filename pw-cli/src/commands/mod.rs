//! CLI command implementations.

pub mod config;
pub mod snapshot;
pub mod watch;

use std::sync::Arc;

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use console::{style, StyledObject};

use pw_core::config::ConfigHandle;
use pw_core::error::{PulseError, PulseResult};
use pw_services::{AlertSeverity, ServiceStatus, TelemetrySession, TelemetrySnapshot};
use pw_socket::{ConnectionState, WebSocketTransport};

/// Helper to start a telemetry session from config.
pub async fn start_session(config: &ConfigHandle) -> PulseResult<TelemetrySession> {
    let cfg = config.snapshot().await;
    if !cfg.is_server_configured() {
        return Err(PulseError::MissingConfig(
            "server address (use --address or `pulsewatch config init`)".into(),
        ));
    }
    Ok(TelemetrySession::start(&cfg, Arc::new(WebSocketTransport::new())).await)
}

/// Format an uptime in seconds as `3d 4h 12m`.
pub fn format_uptime(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m {}s", total % 60)
    }
}

/// Truncate a string to a maximum number of characters, appending an
/// ellipsis if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len > 3 {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    } else {
        s.chars().take(max_len).collect()
    }
}

pub fn connection_label(state: ConnectionState) -> StyledObject<String> {
    let label = state.to_string();
    match state {
        ConnectionState::Connected => style(label).green(),
        ConnectionState::Connecting => style(label).yellow(),
        ConnectionState::Disconnected => style(label).red(),
    }
}

pub fn status_label(status: ServiceStatus) -> StyledObject<String> {
    let label = status.to_string();
    match status {
        ServiceStatus::Online => style(label).green(),
        ServiceStatus::Warning => style(label).yellow(),
        ServiceStatus::Offline => style(label).red().bold(),
    }
}

pub fn severity_label(severity: AlertSeverity) -> StyledObject<String> {
    let label = severity.to_string();
    match severity {
        AlertSeverity::Critical => style(label).red().bold(),
        AlertSeverity::Warning => style(label).yellow(),
        AlertSeverity::Info => style(label).cyan(),
    }
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Print the full snapshot as text tables.
pub fn print_snapshot_text(snapshot: &TelemetrySnapshot) {
    println!("{}", style("Connection").bold().underlined());
    println!("  State:     {}", connection_label(snapshot.connection));
    if let Some(ts) = snapshot.last_update {
        println!("  Updated:   {}", ts.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    println!();
    println!("{}", style("Metrics").bold().underlined());
    match &snapshot.metrics {
        Some(m) => {
            println!("  CPU:       {:.1}%", m.cpu);
            println!(
                "  Memory:    {:.1} / {:.1} ({:.1}%)",
                m.memory.used, m.memory.total, m.memory.percentage
            );
            println!("  Requests:  {}", m.requests);
            println!("  Latency:   {:.0} ms", m.response_time);
            println!("  Sessions:  {}", m.active_sessions);
            println!("  Uptime:    {}", format_uptime(m.uptime));
        }
        None => println!("  No metrics received yet."),
    }

    println!();
    println!("{}", style("Services").bold().underlined());
    if snapshot.services.is_empty() {
        println!("  No services reported.");
    } else {
        let mut table = new_table();
        table.set_header(vec!["Service", "Status", "Latency", "Version", "Last Check"]);
        for s in &snapshot.services {
            table.add_row(vec![
                truncate(&s.name, 30),
                status_label(s.status).to_string(),
                s.response_time
                    .map(|ms| format!("{ms:.0} ms"))
                    .unwrap_or_else(|| "-".into()),
                s.version.clone().unwrap_or_else(|| "-".into()),
                s.last_check.format("%H:%M:%S").to_string(),
            ]);
        }
        println!("{table}");
    }

    if !snapshot.operations.is_empty() {
        println!();
        println!("{}", style("Operations").bold().underlined());
        for op in &snapshot.operations {
            let progress = match (op.fraction(), op.total) {
                (Some(f), Some(total)) => format!("{}/{} ({:.0}%)", op.current, total, f * 100.0),
                _ => op.current.to_string(),
            };
            println!("  {:<30} {}", truncate(&op.label, 30), progress);
        }
    }

    println!();
    println!("{}", style("Alerts").bold().underlined());
    if snapshot.alerts.is_empty() {
        println!("  No alerts.");
    } else {
        let mut table = new_table();
        table.set_header(vec!["Id", "Severity", "Title", "Message", "Time", "Ack"]);
        for a in &snapshot.alerts {
            table.add_row(vec![
                a.id.clone(),
                severity_label(a.severity).to_string(),
                truncate(&a.title, 30),
                truncate(&a.message, 40),
                a.created_at.format("%H:%M:%S").to_string(),
                if a.acknowledged { "yes".into() } else { "-".into() },
            ]);
        }
        println!("{table}");
        println!(
            "\n{} alert(s), {} unacknowledged",
            snapshot.alerts.len(),
            snapshot.unacknowledged_alerts().count()
        );
    }
}

/// Print the snapshot as pretty JSON.
pub fn print_snapshot_json(snapshot: &TelemetrySnapshot) -> PulseResult<()> {
    println!("{}", serde_json::to_string_pretty(snapshot)?);
    Ok(())
}
