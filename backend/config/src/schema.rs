//! Hearth configuration schema.
//!
//! Every section is optional in the file; [`crate::defaults`] fills in what
//! the user left out.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::defaults::{DEFAULT_LOG_LEVEL, DEFAULT_TRIM_THRESHOLD};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HearthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    /// Event bus tuning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus: Option<BusConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<PluginsConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `hearth_plugins=debug`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Directory for daily-rolling JSON logs. Console only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Trace every bus event (payloads are redacted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_events: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim_threshold: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginsConfig {
    /// Builtin plugins that should not be added to the host.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled: Vec<String>,
    /// Per-plugin configuration sections, keyed by plugin name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, Value>,
}

impl HearthConfig {
    pub fn log_level(&self) -> &str {
        self.logging
            .as_ref()
            .and_then(|l| l.level.as_deref())
            .unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.logging.as_ref().and_then(|l| l.dir.as_deref())
    }

    pub fn trace_events(&self) -> bool {
        self.logging
            .as_ref()
            .and_then(|l| l.trace_events)
            .unwrap_or(false)
    }

    pub fn trim_threshold(&self) -> usize {
        self.bus
            .as_ref()
            .and_then(|b| b.trim_threshold)
            .unwrap_or(DEFAULT_TRIM_THRESHOLD)
    }

    pub fn is_plugin_enabled(&self, name: &str) -> bool {
        self.plugins
            .as_ref()
            .map_or(true, |p| !p.disabled.iter().any(|d| d == name))
    }

    /// Configuration sections handed to plugins at registration.
    pub fn plugin_settings(&self) -> BTreeMap<String, Value> {
        self.plugins
            .as_ref()
            .map(|p| p.settings.clone())
            .unwrap_or_default()
    }
}
