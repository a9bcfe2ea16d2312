//! Structured Logger
//!
//! Wraps `tracing` with environment-based level control, a console layer and
//! an optional rolling NDJSON file layer.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the file writer flushing. Hold it until the process exits.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Initialize the global logger.
///
/// `RUST_LOG` overrides `level` when set. Console output goes to stderr so
/// stdout stays free for command output. With `log_dir`, events are also
/// written as JSON to `hearth.log.YYYY-MM-DD` in that directory.
/// Initializing twice is harmless; the second call keeps the first logger.
pub fn init_logger(level: &str, log_dir: Option<&Path>) -> Result<LogGuard> {
    let directive = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| level.to_string());
    let env_filter = parse_filter(&directive)?;

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(true);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "hearth.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    Ok(LogGuard { _file: guard })
}

fn parse_filter(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive)
        .with_context(|| format!("Invalid log level directive '{directive}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_levels_and_target_directives() {
        assert!(parse_filter("debug").is_ok());
        assert!(parse_filter("info,hearth_bus=trace").is_ok());
        assert!(parse_filter("hearth=loud").is_err());
    }

    #[test]
    fn creates_log_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("logs");
        let _guard = init_logger("info", Some(&dir)).unwrap();
        assert!(dir.is_dir());
    }
}
