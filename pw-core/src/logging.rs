//! Log output for the client: compact lines on stderr plus a daily log file
//! under the data directory, optionally as JSON for log shippers.

use std::path::Path;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::PulseResult;

const LOG_FILE_PREFIX: &str = "pulsewatch.log";

/// Crates whose debug output is per-frame noise unless asked for by name.
const QUIET_CRATES: &[&str] = &["tungstenite", "tokio_tungstenite", "rustls"];

/// Install the global subscriber. Keep the returned guard alive for as long
/// as file output is wanted; dropping it flushes the writer.
///
/// `level` takes anything `EnvFilter` accepts, e.g. `debug` or
/// `info,pw_socket=trace`. Invalid directives fall back to `info`.
pub fn init_logging(level: &str, log_dir: &Path, json_output: bool) -> PulseResult<LogGuard> {
    std::fs::create_dir_all(log_dir)?;

    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, LOG_FILE_PREFIX));

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .without_time()
        .compact();

    let json_file = json_output.then(|| {
        fmt::layer()
            .with_writer(writer.clone())
            .json()
            .with_current_span(false)
            .with_file(true)
            .with_line_number(true)
    });
    let text_file = (!json_output).then(|| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_file(true)
            .with_line_number(true)
    });

    tracing_subscriber::registry()
        .with(build_filter(level))
        .with(console)
        .with(json_file)
        .with(text_file)
        .init();

    tracing::info!(
        "logging to {} (level {level}, json {json_output})",
        log_dir.join(LOG_FILE_PREFIX).display()
    );

    Ok(LogGuard { _guard: guard })
}

/// Holds the background log writer open.
pub struct LogGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Stderr-only logging for tests and throwaway runs. Later calls are no-ops.
pub fn init_console_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(build_filter(level))
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(filter_directives(level)).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Append `warn` caps for the websocket stack unless `level` already
/// mentions those crates.
fn filter_directives(level: &str) -> String {
    let mut directives = level.trim().to_string();
    for krate in QUIET_CRATES {
        if !directives.contains(krate) {
            directives.push_str(&format!(",{krate}=warn"));
        }
    }
    directives
}
