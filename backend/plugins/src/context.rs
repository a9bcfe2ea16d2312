//! Plugin context.
//!
//! A [`PluginContext`] is how plugin code acts "as itself": it is handed to
//! `setup` and to every event handler the plugin installs, and every
//! operation on it is attributed to that plugin. The same context is also
//! bound to the running task for the duration of `setup` and of each handler
//! call, so helper code deep in a call tree can reach it through
//! [`current`] without threading it through by hand.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use hearth_bus::{Cursor, HandlerId, HandlerMode};
use hearth_core::{Event, EventType, HearthError, Result, Tool, ToolHandler, ToolRegistry};

use crate::registry::PluginState;
use crate::runtime::Runtime;
use crate::tools;

tokio::task_local! {
    static CURRENT: PluginContext;
}

/// Handle through which a plugin acts on the host.
#[derive(Clone)]
pub struct PluginContext {
    state: Arc<PluginState>,
    runtime: Arc<Runtime>,
}

impl PluginContext {
    pub(crate) fn new(state: Arc<PluginState>, runtime: Arc<Runtime>) -> Self {
        Self { state, runtime }
    }

    pub fn name(&self) -> &str {
        self.state.name()
    }

    /// Resolved configuration section for this plugin (`{}` if none).
    pub fn config(&self) -> &Value {
        self.state.config()
    }

    /// Deserialize the configuration section into `T`.
    pub fn config_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.state.config().clone())?)
    }

    pub fn description(&self) -> Option<String> {
        self.state.description()
    }

    pub fn set_description(&self, description: impl Into<String>) -> Result<()> {
        self.state.ensure_live()?;
        self.state.set_description(description.into());
        Ok(())
    }

    /// Live view of the shared tool map.
    pub fn tools(&self) -> &ToolRegistry {
        &self.runtime.tools
    }

    /// Add a tool to the shared map. Fails with `DuplicateTool` if any
    /// plugin already declared the name.
    ///
    /// The tool runs with this plugin's context bound, so [`current`] and
    /// the free functions of this module work inside it.
    pub fn declare_tool(&self, tool: Tool) -> Result<()> {
        self.state.ensure_live()?;
        let name = tool.name.clone();
        // Weak: the registry lives inside the runtime.
        let state = Arc::clone(&self.state);
        let runtime = Arc::downgrade(&self.runtime);
        let tool = tool.wrap_handler(move |inner| {
            move |args: Value| {
                let inner = Arc::clone(&inner);
                let state = Arc::clone(&state);
                let runtime = runtime.clone();
                async move {
                    let runtime = runtime
                        .upgrade()
                        .ok_or_else(|| anyhow::anyhow!("host for plugin '{}' is gone", state.name()))?;
                    let ctx = PluginContext::new(state, runtime);
                    CURRENT.scope(ctx, inner.call(args)).await
                }
            }
        });
        self.runtime.tools.register(tool)?;
        self.state.record_tool(name.clone());
        info!(plugin = %self.name(), tool = %name, "Tool declared");
        Ok(())
    }

    /// Remove a tool this plugin declared.
    pub fn remove_tool(&self, name: &str) -> Result<()> {
        self.state.ensure_live()?;
        if !self.state.owns_tool(name) {
            return Err(HearthError::NotOwner {
                plugin: self.name().to_string(),
                tool: name.to_string(),
            });
        }
        self.runtime.tools.remove(name);
        self.state.forget_tool(name);
        info!(plugin = %self.name(), tool = %name, "Tool removed");
        Ok(())
    }

    /// Invoke a tool through the bus and wait for its result.
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<Value> {
        self.state.ensure_live()?;
        tools::call(&self.runtime, name, args).await
    }

    /// Publish an event. Lifecycle sentinels cannot be sent by plugins.
    pub fn send_event(&self, event: Event) -> Result<u64> {
        self.state.ensure_live()?;
        self.runtime.publish(event)
    }

    /// Run `handler` for every future event of type `event`.
    ///
    /// Handlers run on their own task with this plugin's context bound, both
    /// as the first argument and for [`current`]. Events that arrive after
    /// the plugin was torn down are ignored; payloads that fail to decode are
    /// reported as handler errors.
    pub fn on_event<T, F, Fut>(&self, event: &EventType<T>, handler: F) -> Result<HandlerId>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(PluginContext, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.state.ensure_live()?;
        let ctx = self.clone();
        let ty = event.clone();
        let handler = Arc::new(handler);
        let id = self.runtime.dispatcher.handle(
            &[event.id().clone()],
            HandlerMode::Concurrent,
            move |ev| {
                let ctx = ctx.clone();
                let ty = ty.clone();
                let handler = Arc::clone(&handler);
                async move {
                    if !ctx.state.is_live() {
                        debug!(plugin = %ctx.name(), seq = ev.seq, "Skipping event for inactive plugin");
                        return Ok(None);
                    }
                    let Some(data) = ty.decode(&ev) else {
                        return Ok(None);
                    };
                    let data = data?;
                    CURRENT.scope(ctx.clone(), handler(ctx, data)).await?;
                    Ok(None)
                }
                .boxed()
            },
        );
        self.state.record_handler(id);
        Ok(id)
    }

    /// Issue a new event identifier scoped to this plugin.
    ///
    /// With a label the id is `<plugin>/<label>/<epoch>` and the epoch is left
    /// alone, so the same label yields the same id. Without one the id is
    /// `<plugin>/<epoch>` and the epoch is incremented, so every call yields a
    /// fresh id.
    pub fn define_event<T>(&self, label: Option<&str>) -> Result<EventType<T>> {
        self.state.ensure_live()?;
        let id = match label {
            Some(label) => {
                if label.is_empty() || label.contains('/') {
                    return Err(HearthError::InvalidEventLabel(label.to_string()));
                }
                format!("{}/{}/{}", self.name(), label, self.state.epoch())
            }
            None => format!("{}/{}", self.name(), self.state.next_epoch()),
        };
        Ok(EventType::new(id))
    }

    /// A cursor over events from the host's latest barrier onward, without
    /// the register/unregister sentinels.
    pub fn stream(&self) -> Result<Cursor> {
        self.state.ensure_live()?;
        Ok(self.runtime.cursors.stream())
    }

    /// See [`CursorManager::wait_for`](crate::cursor::CursorManager::wait_for).
    pub async fn wait_for<F, Fut, R>(&self, handler: F) -> Result<R>
    where
        F: FnOnce(Cursor) -> Fut,
        Fut: Future<Output = R>,
    {
        self.state.ensure_live()?;
        Ok(self.runtime.cursors.wait_for(handler).await)
    }

    /// Run a synchronous call with this context bound to the current task.
    pub(crate) fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(self.clone(), f)
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin", &self.name())
            .field("status", &self.state.status())
            .finish()
    }
}

/// The context of the plugin whose `setup` or handler is running on this
/// task. Fails with `NoActivePlugin` anywhere else.
pub fn current() -> Result<PluginContext> {
    CURRENT
        .try_with(PluginContext::clone)
        .map_err(|_| HearthError::NoActivePlugin)
}

pub fn set_description(description: impl Into<String>) -> Result<()> {
    current()?.set_description(description)
}

pub fn declare_tool(tool: Tool) -> Result<()> {
    current()?.declare_tool(tool)
}

pub fn send_event(event: Event) -> Result<u64> {
    current()?.send_event(event)
}

pub fn define_event<T>(label: Option<&str>) -> Result<EventType<T>> {
    current()?.define_event(label)
}

pub fn on_event<T, F, Fut>(event: &EventType<T>, handler: F) -> Result<HandlerId>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(PluginContext, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    current()?.on_event(event, handler)
}

pub async fn call_tool(name: &str, args: Value) -> Result<Value> {
    current()?.call_tool(name, args).await
}

pub fn stream() -> Result<Cursor> {
    current()?.stream()
}

pub async fn wait_for<F, Fut, R>(handler: F) -> Result<R>
where
    F: FnOnce(Cursor) -> Fut,
    Fut: Future<Output = R>,
{
    current()?.wait_for(handler).await
}
