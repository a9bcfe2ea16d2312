//! `hearth-config`: configuration for the Hearth plugin host.
//!
//! Provides:
//! - Typed config schema (logging, bus, per-plugin settings)
//! - YAML read/write
//! - `${ENV_VAR}` substitution
//! - Default value application
//! - Validation with field paths

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use defaults::apply_all_defaults;
pub use env::{collect_referenced_vars, resolve_env_vars, resolve_env_vars_with, MissingEnvVarError};
pub use io::{config_dir, config_file_path, load_config, read_config_value, write_config};
pub use schema::{BusConfig, HearthConfig, LoggingConfig, PluginsConfig};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::Path;

/// Load a config file, substitute `${VAR}` references from the process
/// environment, apply defaults and validate.
///
/// A missing file yields the defaults. Validation errors fail the load;
/// warnings are returned in the report for the caller to log once logging
/// is up.
pub async fn load_and_prepare(path: &Path) -> Result<(HearthConfig, ValidationReport)> {
    let env: HashMap<String, String> = std::env::vars().collect();
    load_and_prepare_with(path, &env).await
}

/// [`load_and_prepare`] with an explicit environment.
pub async fn load_and_prepare_with(
    path: &Path,
    env: &HashMap<String, String>,
) -> Result<(HearthConfig, ValidationReport)> {
    let config = match read_config_value(path).await? {
        Some(raw) => {
            let value = resolve_env_vars_with(&raw, env)
                .context("Failed to resolve env vars in config")?;
            serde_json::from_value(value)
                .with_context(|| format!("Invalid config at: {}", path.display()))?
        }
        None => HearthConfig::default(),
    };
    let config = apply_all_defaults(config);

    let report = validate(&config);
    if !report.is_valid() {
        let details: Vec<String> = report.errors.iter().map(ToString::to_string).collect();
        bail!("Config at {} is invalid: {}", path.display(), details.join("; "));
    }
    Ok((config, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn prepares_file_with_env_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        tokio::fs::write(
            &path,
            "logging:\n  dir: ${LOG_ROOT}/logs\nplugins:\n  settings:\n    echo:\n      prefix: ${PREFIX}\n",
        )
        .await
        .unwrap();

        let (config, report) =
            load_and_prepare_with(&path, &env(&[("LOG_ROOT", "/var/hearth"), ("PREFIX", ">>")]))
                .await
                .unwrap();
        assert!(report.is_valid());
        assert_eq!(config.log_dir(), Some(Path::new("/var/hearth/logs")));
        assert_eq!(config.log_level(), "info");
        assert_eq!(config.plugin_settings()["echo"]["prefix"], ">>");
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (config, _) = load_and_prepare_with(&dir.path().join("absent.yaml"), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(config, apply_all_defaults(HearthConfig::default()));
    }

    #[tokio::test]
    async fn invalid_config_and_missing_env_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        tokio::fs::write(&path, "bus:\n  trimThreshold: 0\n").await.unwrap();
        let err = load_and_prepare_with(&path, &HashMap::new()).await.unwrap_err();
        assert!(err.to_string().contains("trimThreshold"));

        tokio::fs::write(&path, "logging:\n  level: ${UNSET_LEVEL}\n").await.unwrap();
        let err = load_and_prepare_with(&path, &HashMap::new()).await.unwrap_err();
        assert!(format!("{err:#}").contains("UNSET_LEVEL"));
    }
}
