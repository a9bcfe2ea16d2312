//! Plugins that ship with the `hearth` binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use hearth_core::{EventType, Explanation, Tool};
use hearth_plugins::{define_plugin, FnPlugin, PluginContext};

/// Every builtin plugin, in registration order.
pub fn all() -> Vec<FnPlugin> {
    vec![echo(), clock()]
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct EchoSettings {
    /// Prepended to string values.
    prefix: String,
}

/// `echo` tool: returns `value` unchanged, or with the configured prefix
/// when it is a string.
pub fn echo() -> FnPlugin {
    define_plugin("echo", |ctx| {
        let settings: EchoSettings = ctx.config_as()?;
        let prefix = Arc::new(settings.prefix);
        ctx.declare_tool(
            Tool::new("echo", "Return `value` unchanged", move |args: Value| {
                let prefix = Arc::clone(&prefix);
                async move { Ok(prefixed(&prefix, args.get("value").cloned().unwrap_or(Value::Null))) }
            })
            .args(json!({"value": "any JSON value"}))
            .return_vals(json!("the same value"))
            .explain_args(|args| {
                Explanation::new(format!("echo {}", args.get("value").unwrap_or(&Value::Null)))
            })
            .explain_return_vals(|_, result| Explanation::new(format!("echoed {result}"))),
        )?;
        Ok(None)
    })
    .with_description("Returns its input")
}

fn prefixed(prefix: &str, value: Value) -> Value {
    match value {
        Value::String(s) if !prefix.is_empty() => Value::String(format!("{prefix}{s}")),
        other => other,
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ClockSettings {
    /// Tick period in milliseconds; 0 disables ticking.
    tick_ms: u64,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self { tick_ms: 1000 }
    }
}

/// Payload of the `clock/tick/<epoch>` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub count: u64,
    pub at: DateTime<Utc>,
}

/// `time` tool plus a periodic tick event.
pub fn clock() -> FnPlugin {
    define_plugin("clock", |ctx| {
        let settings: ClockSettings = ctx.config_as()?;
        ctx.set_description("Tells the time and publishes periodic ticks")?;
        ctx.declare_tool(
            Tool::new(
                "time",
                "Current UTC time as `rfc3339` (default) or `unix` seconds",
                |args: Value| async move { now(args.get("format").and_then(Value::as_str)) },
            )
            .args(json!({"format": "rfc3339 | unix"}))
            .return_vals(json!("timestamp"))
            .explain_args(|args| {
                let format = args.get("format").and_then(Value::as_str).unwrap_or("rfc3339");
                Explanation::new(format!("current time ({format})"))
            }),
        )?;

        let tick: EventType<Tick> = ctx.define_event(Some("tick"))?;
        if settings.tick_ms == 0 {
            return Ok(None);
        }
        let ticker = tokio::spawn(run_ticker(
            ctx.clone(),
            tick,
            Duration::from_millis(settings.tick_ms),
        ));
        Ok(Some(Box::new(move || ticker.abort())))
    })
}

fn now(format: Option<&str>) -> anyhow::Result<Value> {
    let now = Utc::now();
    Ok(match format {
        None | Some("rfc3339") => json!(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        Some("unix") => json!(now.timestamp()),
        Some(other) => bail!("unknown time format '{other}'"),
    })
}

async fn run_ticker(ctx: PluginContext, tick: EventType<Tick>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    // The first tick completes immediately.
    interval.tick().await;
    for count in 1.. {
        interval.tick().await;
        let sent = tick
            .with(Tick {
                count,
                at: Utc::now(),
            })
            .and_then(|event| ctx.send_event(event));
        if let Err(e) = sent {
            debug!(error = %e, "Clock ticker stopping");
            break;
        }
    }
}
