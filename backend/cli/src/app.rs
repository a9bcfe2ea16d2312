//! Wires configuration and builtin plugins into a running host.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use hearth_config::HearthConfig;
use hearth_core::Phase;
use hearth_plugins::{Host, HostBuilder, Plugin, PluginInfo, PluginStatus};

use crate::builtin;

/// Builder with every enabled builtin plugin and its configured settings.
pub fn host_builder(config: &HearthConfig) -> Result<HostBuilder> {
    let mut builder = HostBuilder::new();
    builder
        .trim_threshold(config.trim_threshold())
        .with_plugin_configs(config.plugin_settings());
    for plugin in builtin::all() {
        if config.is_plugin_enabled(plugin.name()) {
            builder.add(plugin)?;
        } else {
            info!(plugin = %plugin.name(), "Plugin disabled by config");
        }
    }
    Ok(builder)
}

/// A host that has finished registering, plus the event tracer if enabled.
pub struct Session {
    pub host: Host,
    tracer: Option<JoinHandle<u64>>,
}

impl Session {
    pub async fn start(config: &HearthConfig) -> Result<Self> {
        let host = host_builder(config)?.run()?;
        let tracer = config
            .trace_events()
            .then(|| tokio::spawn(hearth_logging::trace_stream(host.stream())));
        host.wait_for_phase(Phase::Running).await?;
        for plugin in host.plugins() {
            if let PluginStatus::Failed(reason) = &plugin.status {
                warn!(plugin = %plugin.name, reason = %reason, "Plugin failed to start");
            }
        }
        Ok(Self { host, tracer })
    }

    pub async fn stop(self) -> Result<()> {
        self.host.stop().await?;
        if let Some(tracer) = self.tracer {
            let traced = tracer.await.context("Event tracer task failed")?;
            info!(events = traced, "Event trace complete");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub plugin: String,
    pub description: String,
    pub args: Value,
}

/// Every declared tool with the plugin that owns it, sorted by name.
pub fn tool_summaries(host: &Host) -> Vec<ToolSummary> {
    let plugins = host.plugins();
    host.tools()
        .snapshot()
        .into_iter()
        .map(|tool| ToolSummary {
            plugin: owner(&plugins, &tool.name),
            name: tool.name.clone(),
            description: tool.description.clone(),
            args: tool.args.clone(),
        })
        .collect()
}

fn owner(plugins: &[PluginInfo], tool: &str) -> String {
    plugins
        .iter()
        .find(|p| p.tools.iter().any(|t| t == tool))
        .map(|p| p.name.clone())
        .unwrap_or_default()
}

pub async fn list_tools(config: &HearthConfig) -> Result<Vec<ToolSummary>> {
    let session = Session::start(config).await?;
    let tools = tool_summaries(&session.host);
    session.stop().await?;
    Ok(tools)
}

pub async fn list_plugins(config: &HearthConfig) -> Result<Vec<PluginInfo>> {
    let session = Session::start(config).await?;
    let plugins = session.host.plugins();
    session.stop().await?;
    Ok(plugins)
}

/// Run the host, invoke `tool` once, and stop. The host is stopped even
/// when the call fails.
pub async fn call_tool(config: &HearthConfig, tool: &str, args: Value) -> Result<Value> {
    let session = Session::start(config).await?;
    if let Some(explained) = session.host.tools().explain_args(tool, &args) {
        info!(tool = %tool, summary = %explained.summary, "Calling tool");
    }
    let result = session.host.call_tool(tool, args).await;
    session.stop().await?;
    Ok(result?)
}
