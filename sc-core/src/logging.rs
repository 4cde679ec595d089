//! Structured logging setup using the `tracing` ecosystem.
//!
//! Console output goes to stderr; a daily-rotated file under the log
//! directory receives the same records, either as plain text or JSON.
//! `RUST_LOG` overrides the configured level when set.

use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::error::{ScError, ScResult};

const LOG_FILE_PREFIX: &str = "stream-client.log";
const FALLBACK_LEVEL: &str = "info";

/// Transport crates log every frame at debug; keep them quiet unless asked.
const QUIET_DIRECTIVES: &[&str] = &["tungstenite=warn", "tokio_tungstenite=warn", "rustls=warn"];

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Guard that keeps the non-blocking log writer alive.
/// Drop this to flush and close the log file.
pub struct LogGuard {
    _guard: WorkerGuard,
}

/// Build the level filter: `RUST_LOG`, then `level`, then `info`.
fn build_filter(level: &str) -> EnvFilter {
    let mut filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_LEVEL));

    for directive in QUIET_DIRECTIVES {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

fn file_layer(writer: NonBlocking, json_output: bool) -> BoxedLayer {
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    if json_output {
        layer.json().with_thread_ids(true).boxed()
    } else {
        layer.boxed()
    }
}

/// Initialize the global tracing subscriber.
///
/// * `level` - Log level or filter directive: "info", "sc_socket=debug", ...
/// * `log_dir` - Directory for the rotated log files, created if missing
/// * `json_output` - Write the file log as JSON lines
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(level: &str, log_dir: &Path, json_output: bool) -> ScResult<LogGuard> {
    std::fs::create_dir_all(log_dir)?;

    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, LOG_FILE_PREFIX));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    tracing_subscriber::registry()
        .with(file_layer(writer, json_output))
        .with(console_layer)
        .with(build_filter(level))
        .try_init()
        .map_err(|e| ScError::Internal(format!("logging already initialized: {e}")))?;

    tracing::info!(
        level,
        dir = %log_dir.display(),
        json = json_output,
        "logging initialized"
    );

    Ok(LogGuard { _guard: guard })
}

/// Console-only logger for tests and quick tools. Repeated calls are no-ops.
pub fn init_console_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer().with_target(true).compact())
        .with(build_filter(level))
        .try_init();
}
