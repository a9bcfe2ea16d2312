//! Config defaults: fills in the sections a user left out.

use crate::schema::{BusConfig, HearthConfig, LoggingConfig, PluginsConfig};

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Retained bus entries before consumed events are dropped.
pub const DEFAULT_TRIM_THRESHOLD: usize = 1024;

/// Apply all defaults to a freshly loaded config.
pub fn apply_all_defaults(config: HearthConfig) -> HearthConfig {
    let config = apply_logging_defaults(config);
    let config = apply_bus_defaults(config);
    apply_plugin_defaults(config)
}

fn apply_logging_defaults(mut config: HearthConfig) -> HearthConfig {
    let logging = config.logging.get_or_insert_with(LoggingConfig::default);
    if logging.level.is_none() {
        logging.level = Some(DEFAULT_LOG_LEVEL.to_string());
    }
    if logging.trace_events.is_none() {
        logging.trace_events = Some(false);
    }
    config
}

fn apply_bus_defaults(mut config: HearthConfig) -> HearthConfig {
    let bus = config.bus.get_or_insert_with(BusConfig::default);
    if bus.trim_threshold.is_none() {
        bus.trim_threshold = Some(DEFAULT_TRIM_THRESHOLD);
    }
    config
}

fn apply_plugin_defaults(mut config: HearthConfig) -> HearthConfig {
    config.plugins.get_or_insert_with(PluginsConfig::default);
    config
}
