//! Tracing subscriber setup.
//!
//! Filter precedence: `RUST_LOG`, then `--verbose` (debug), then the
//! `[logging] level` setting. JSON output emits one object per line with
//! structured fields as keys, which is what audit tooling consumes.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::{LogFormat, WorkbenchConfig};

/// Build the env filter for the given configuration.
pub fn env_filter(level: &str, verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = if verbose { "debug" } else { level };
    EnvFilter::new(format!("workbench={level},warn"))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; hold it for the
/// lifetime of the process.
pub fn init(config: &WorkbenchConfig) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(&config.toml.logging.level, config.verbose);

    let (writer, guard) = match config.log_dir() {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(&dir, "workbench.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false);

    let installed = match config.toml.logging.format {
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    Ok(guard)
}
