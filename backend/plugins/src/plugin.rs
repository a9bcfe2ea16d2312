//! The plugin contract.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::PluginContext;

/// Teardown callback returned from [`Plugin::setup`]. Runs exactly once,
/// during the unregister phase.
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// An independently authored capability unit.
///
/// `setup` runs once, synchronously, during the register phase. Everything
/// the plugin wants to do later (react to events, serve tools) it installs
/// through the context it is given.
pub trait Plugin: Send + Sync {
    /// Globally unique name. Must be non-empty, must not contain `/` and
    /// must not be `core`.
    fn name(&self) -> &str;

    /// Initial description, shown before (or instead of) anything `setup`
    /// sets through [`PluginContext::set_description`].
    fn description(&self) -> Option<String> {
        None
    }

    fn setup(&self, ctx: &PluginContext) -> anyhow::Result<Option<Cleanup>>;
}

type SetupFn = Box<dyn Fn(&PluginContext) -> anyhow::Result<Option<Cleanup>> + Send + Sync>;

/// A plugin built from a name and a setup closure.
pub struct FnPlugin {
    name: String,
    description: Option<String>,
    setup: SetupFn,
}

impl FnPlugin {
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Plugin for FnPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<String> {
        self.description.clone()
    }

    fn setup(&self, ctx: &PluginContext) -> anyhow::Result<Option<Cleanup>> {
        (self.setup)(ctx)
    }
}

impl fmt::Debug for FnPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPlugin").field("name", &self.name).finish()
    }
}

/// Define a plugin inline.
///
/// ```
/// use hearth_plugins::define_plugin;
///
/// let noop = define_plugin("noop", |ctx| {
///     ctx.set_description("this plugin does nothing")?;
///     Ok(None)
/// });
/// # let _ = noop;
/// ```
pub fn define_plugin<F>(name: impl Into<String>, setup: F) -> FnPlugin
where
    F: Fn(&PluginContext) -> anyhow::Result<Option<Cleanup>> + Send + Sync + 'static,
{
    FnPlugin {
        name: name.into(),
        description: None,
        setup: Box::new(setup),
    }
}

/// Registration status of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status", content = "reason")]
pub enum PluginStatus {
    /// Added, setup not run yet (or running right now).
    Pending,
    Active,
    /// Setup failed; everything it installed was rolled back.
    Failed(String),
    Stopped,
}

/// Point-in-time copy of a plugin's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub description: Option<String>,
    pub status: PluginStatus,
    pub epoch: u64,
    pub tools: Vec<String>,
}
