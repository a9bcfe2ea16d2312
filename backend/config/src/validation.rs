//! Config validation with field paths and readable messages.

use crate::schema::HearthConfig;
use thiserror::Error;

const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// Smallest trim threshold that does not make the log trim on nearly every
/// publish.
const MIN_SENSIBLE_TRIM_THRESHOLD: usize = 16;

#[derive(Debug, Error)]
#[error("config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// Everything found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    /// Emit every finding through `tracing`.
    pub fn log(&self) {
        for warning in &self.warnings {
            tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
        }
        for error in &self.errors {
            tracing::error!(path = %error.path, message = %error.message, "Config error");
        }
    }
}

pub fn validate(config: &HearthConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_logging(config, &mut report);
    validate_bus(config, &mut report);
    validate_plugins(config, &mut report);
    report
}

fn validate_logging(config: &HearthConfig, report: &mut ValidationReport) {
    let Some(logging) = &config.logging else { return };
    if let Some(level) = &logging.level {
        // Per-target directives like `hearth_bus=trace` are left to EnvFilter.
        let plain = !level.contains('=') && !level.contains(',');
        if level.trim().is_empty() {
            report.error("logging.level", "Level cannot be empty");
        } else if plain && !LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
            report.error(
                "logging.level",
                format!("Unknown level '{level}'. Use one of {}", LEVELS.join(", ")),
            );
        }
    }
    if let Some(dir) = &logging.dir {
        if dir.as_os_str().is_empty() {
            report.error("logging.dir", "Log directory cannot be empty; omit it for console-only logging");
        }
    }
}

fn validate_bus(config: &HearthConfig, report: &mut ValidationReport) {
    let Some(threshold) = config.bus.as_ref().and_then(|b| b.trim_threshold) else {
        return;
    };
    if threshold == 0 {
        report.error("bus.trimThreshold", "trimThreshold must be >= 1");
    } else if threshold < MIN_SENSIBLE_TRIM_THRESHOLD {
        report.warn(
            "bus.trimThreshold",
            format!("trimThreshold {threshold} is very low; the log will trim on almost every event"),
        );
    }
}

fn validate_plugins(config: &HearthConfig, report: &mut ValidationReport) {
    let Some(plugins) = &config.plugins else { return };
    for name in plugins.settings.keys() {
        let path = format!("plugins.settings.{name}");
        if name.is_empty() || name.contains('/') || name == "core" {
            report.error(path, "Not a valid plugin name (empty, contains '/', or 'core')");
        } else if plugins.disabled.contains(name) {
            report.warn(path, "Settings given for a disabled plugin are ignored");
        }
    }
    for (i, name) in plugins.disabled.iter().enumerate() {
        if name.trim().is_empty() {
            report.error(format!("plugins.disabled[{i}]"), "Plugin name cannot be empty");
        }
    }
}
