//! `${VAR}` substitution in config values.
//!
//! Only string leaves are rewritten and only uppercase `[A-Z_][A-Z0-9_]*`
//! names are recognised. `$${VAR}` is an escape for a literal `${VAR}`.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;

/// Matches `${NAME}` and its escaped form `$${NAME}`.
static REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\$?)\$\{([A-Z_][A-Z0-9_]*)\}").expect("env reference pattern"));

#[derive(Debug, thiserror::Error)]
#[error("missing env var \"{var_name}\" referenced at config path: {config_path}")]
pub struct MissingEnvVarError {
    pub var_name: String,
    pub config_path: String,
}

/// Substitute references using the process environment. Unset and empty
/// variables are both errors.
pub fn resolve_env_vars(value: &Value) -> Result<Value, MissingEnvVarError> {
    resolve_env_vars_with(value, &std::env::vars().collect())
}

/// Substitute references using `env` instead of the process environment.
pub fn resolve_env_vars_with(
    value: &Value,
    env: &HashMap<String, String>,
) -> Result<Value, MissingEnvVarError> {
    substitute(value, env, "")
}

fn substitute(
    value: &Value,
    env: &HashMap<String, String>,
    path: &str,
) -> Result<Value, MissingEnvVarError> {
    Ok(match value {
        Value::String(s) => Value::String(substitute_str(s, env, path)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, v)| substitute(v, env, &format!("{path}[{i}]")))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, v) in map {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                out.insert(key.clone(), substitute(v, env, &child)?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}

fn substitute_str(
    s: &str,
    env: &HashMap<String, String>,
    path: &str,
) -> Result<String, MissingEnvVarError> {
    if !s.contains("${") {
        return Ok(s.to_string());
    }
    let mut missing = None;
    let replaced = REFERENCE.replace_all(s, |caps: &Captures| {
        let name = &caps[2];
        if !caps[1].is_empty() {
            return format!("${{{name}}}");
        }
        match env.get(name) {
            Some(val) if !val.is_empty() => val.clone(),
            _ => {
                missing.get_or_insert_with(|| MissingEnvVarError {
                    var_name: name.to_string(),
                    config_path: path.to_string(),
                });
                String::new()
            }
        }
    });
    match missing {
        Some(err) => Err(err),
        None => Ok(replaced.into_owned()),
    }
}

/// Names of every variable referenced (not escaped) anywhere in `value`.
pub fn collect_referenced_vars(value: &Value) -> Vec<String> {
    fn walk(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::String(s) => out.extend(
                REFERENCE
                    .captures_iter(s)
                    .filter(|c| c[1].is_empty())
                    .map(|c| c[2].to_string()),
            ),
            Value::Array(items) => items.iter().for_each(|v| walk(v, out)),
            Value::Object(map) => map.values().for_each(|v| walk(v, out)),
            _ => {}
        }
    }
    let mut vars = Vec::new();
    walk(value, &mut vars);
    vars.sort();
    vars.dedup();
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn substitutes_nested_and_array_values() {
        let v = json!({"plugins": {"settings": {"clock": {"zone": "${TZ_NAME}"}}}, "list": ["a-${SUFFIX}"]});
        let env = env(&[("TZ_NAME", "UTC"), ("SUFFIX", "1")]);
        let out = resolve_env_vars_with(&v, &env).unwrap();
        assert_eq!(out["plugins"]["settings"]["clock"]["zone"], "UTC");
        assert_eq!(out["list"][0], "a-1");
    }

    #[test]
    fn missing_var_reports_path() {
        let v = json!({"logging": {"dir": "${LOG_HOME}/hearth"}});
        let err = resolve_env_vars_with(&v, &HashMap::new()).unwrap_err();
        assert_eq!(err.var_name, "LOG_HOME");
        assert_eq!(err.config_path, "logging.dir");
    }

    #[test]
    fn empty_var_is_missing() {
        let v = json!("${EMPTY}");
        assert!(resolve_env_vars_with(&v, &env(&[("EMPTY", "")])).is_err());
    }

    #[test]
    fn escaped_reference_is_kept_literally() {
        let v = json!({"template": "$${HOME} vs ${USER_NAME}"});
        let out = resolve_env_vars_with(&v, &env(&[("USER_NAME", "ada")])).unwrap();
        assert_eq!(out["template"], "${HOME} vs ada");
    }

    #[test]
    fn lowercase_and_non_strings_pass_through() {
        let v = json!({"a": "${lower}", "b": 3, "c": null});
        let out = resolve_env_vars_with(&v, &HashMap::new()).unwrap();
        assert_eq!(out, v);
    }

    #[test]
    fn collects_only_unescaped_references() {
        let v = json!({"a": "${FOO}", "b": {"c": "${BAR} $${BAZ}"}, "d": ["${FOO}"]});
        assert_eq!(collect_referenced_vars(&v), vec!["BAR", "FOO"]);
    }
}
