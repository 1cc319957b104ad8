//! Watch command - stream telemetry changes to the terminal.

use std::collections::{HashMap, HashSet};

use chrono::Local;
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::broadcast;

use pw_core::config::ConfigHandle;
use pw_core::error::PulseResult;
use pw_services::{OperationProgress, TelemetrySnapshot};
use pw_socket::SocketEvent;

use crate::OutputFormat;

/// Run the watch command.
pub async fn run(config: ConfigHandle, raw: bool, format: OutputFormat) -> PulseResult<()> {
    let session = super::start_session(&config).await?;
    let address = session.manager().server_address().await;
    let mut updates = session.store().watch();
    let mut raw_events = raw.then(|| session.manager().dispatcher().subscribe());

    let multi = MultiProgress::new();
    let mut bars: HashMap<String, ProgressBar> = HashMap::new();
    let mut previous = updates.borrow_and_update().clone();

    if let OutputFormat::Text = format {
        println!(
            "{} Watching {} (Ctrl+C to stop)",
            style("PulseWatch").bold(),
            style(&address).cyan()
        );
        println!();
    }

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = updates.borrow_and_update().clone();
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string(&*current)?),
                    OutputFormat::Text => {
                        for line in describe_changes(&previous, &current) {
                            multi.suspend(|| println!("{line}"));
                        }
                        sync_progress_bars(&multi, &mut bars, &current.operations);
                    }
                }
                previous = current;
            }
            Some(event) = next_raw(&mut raw_events) => match event {
                Ok(ev) => multi.suspend(|| {
                    println!(
                        "  {} {}",
                        style(format!("[{}]", ev.event_type.as_str())).dim(),
                        ev.data
                    )
                }),
                Err(broadcast::error::RecvError::Lagged(n)) => multi.suspend(|| {
                    println!("  {} Missed {n} raw events (slow consumer)", style("WARN").yellow())
                }),
                Err(broadcast::error::RecvError::Closed) => raw_events = None,
            },
            _ = tokio::signal::ctrl_c() => {
                multi.suspend(|| println!("\n  Disconnecting..."));
                break;
            }
        }
    }

    for bar in bars.values() {
        bar.finish_and_clear();
    }
    let last = session.shutdown().await;

    if let OutputFormat::Text = format {
        println!(
            "  {} {} service(s), {} alert(s), {} unacknowledged",
            style("Stopped.").bold(),
            last.services.len(),
            last.alerts.len(),
            last.unacknowledged_alerts().count()
        );
    }
    Ok(())
}

async fn next_raw(
    rx: &mut Option<broadcast::Receiver<SocketEvent>>,
) -> Option<Result<SocketEvent, broadcast::error::RecvError>> {
    match rx {
        Some(rx) => Some(rx.recv().await),
        None => std::future::pending().await,
    }
}

/// Human-readable lines describing what changed between two snapshots.
fn describe_changes(previous: &TelemetrySnapshot, current: &TelemetrySnapshot) -> Vec<String> {
    let now = Local::now().format("%H:%M:%S").to_string();
    let stamp = style(format!("[{now}]")).dim();
    let mut lines = Vec::new();

    if previous.connection != current.connection {
        lines.push(format!(
            "{stamp} connection {}",
            super::connection_label(current.connection)
        ));
    }

    if previous.last_update != current.last_update {
        if let Some(m) = &current.metrics {
            lines.push(format!(
                "{stamp} cpu {:.1}% | mem {:.1}% | {} req | {:.0} ms | {} sessions",
                m.cpu, m.memory.percentage, m.requests, m.response_time, m.active_sessions
            ));
        }
    }

    for service in &current.services {
        match previous.service(&service.name) {
            None => lines.push(format!(
                "{stamp} service {} {}",
                style(&service.name).bold(),
                super::status_label(service.status)
            )),
            Some(before) if before.status != service.status => lines.push(format!(
                "{stamp} service {} {} -> {}",
                style(&service.name).bold(),
                super::status_label(before.status),
                super::status_label(service.status)
            )),
            Some(_) => {}
        }
    }

    let known: HashSet<&str> = previous.alerts.iter().map(|a| a.id.as_str()).collect();
    for alert in current.alerts.iter().rev().filter(|a| !known.contains(a.id.as_str())) {
        let source = alert
            .source
            .as_deref()
            .map(|s| format!(" ({s})"))
            .unwrap_or_default();
        lines.push(format!(
            "{stamp} {} {}: {}{source}",
            super::severity_label(alert.severity),
            style(&alert.title).bold(),
            alert.message
        ));
    }

    if !previous.alerts.is_empty() && current.alerts.is_empty() {
        lines.push(format!("{stamp} alerts cleared"));
    }

    lines
}

/// Keep one progress bar per in-flight operation.
fn sync_progress_bars(
    multi: &MultiProgress,
    bars: &mut HashMap<String, ProgressBar>,
    operations: &[OperationProgress],
) {
    let live: HashSet<&str> = operations.iter().map(|op| op.id.as_str()).collect();
    bars.retain(|id, bar| {
        let keep = live.contains(id.as_str());
        if !keep {
            bar.finish_and_clear();
            multi.remove(bar);
        }
        keep
    });

    for op in operations {
        let bar = bars
            .entry(op.id.clone())
            .or_insert_with(|| multi.add(new_bar(op.total.is_some())));
        if let Some(total) = op.total {
            bar.set_length(total);
        }
        bar.set_position(op.current);
        bar.set_message(super::truncate(&op.label, 24));
    }
}

fn new_bar(bounded: bool) -> ProgressBar {
    if bounded {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("  {msg:<24} [{bar:30}] {pos}/{len} ({percent}%)")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    } else {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner} {msg:<24} {pos}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar
    }
}
