//! Plugin registry: the registered plugin set and each plugin's private state.
//!
//! Plugins are kept in insertion order; setup and cleanup both follow it.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::debug;

use hearth_bus::HandlerId;
use hearth_core::event::CORE_NAMESPACE;
use hearth_core::{HearthError, Result};

use crate::plugin::{Cleanup, Plugin, PluginInfo, PluginStatus};

/// System-owned state of one registered plugin.
pub struct PluginState {
    name: String,
    config: Value,
    inner: Mutex<StateInner>,
}

struct StateInner {
    description: Option<String>,
    epoch: u64,
    cleanup: Option<Cleanup>,
    status: PluginStatus,
    tools: Vec<String>,
    handlers: Vec<HandlerId>,
}

impl PluginState {
    fn new(name: String, config: Value, description: Option<String>) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(StateInner {
                description,
                epoch: 0,
                cleanup: None,
                status: PluginStatus::Pending,
                tools: Vec::new(),
                handlers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Value {
        &self.config
    }

    pub fn status(&self) -> PluginStatus {
        self.lock().status.clone()
    }

    /// Whether plugin-scoped operations are currently allowed.
    pub fn is_live(&self) -> bool {
        matches!(self.lock().status, PluginStatus::Pending | PluginStatus::Active)
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(HearthError::NoActivePlugin)
        }
    }

    pub fn description(&self) -> Option<String> {
        self.lock().description.clone()
    }

    pub(crate) fn set_description(&self, description: String) {
        self.lock().description = Some(description);
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Current epoch, then increment.
    pub(crate) fn next_epoch(&self) -> u64 {
        let mut inner = self.lock();
        let epoch = inner.epoch;
        inner.epoch += 1;
        epoch
    }

    pub(crate) fn record_tool(&self, name: String) {
        self.lock().tools.push(name);
    }

    pub(crate) fn owns_tool(&self, name: &str) -> bool {
        self.lock().tools.iter().any(|t| t == name)
    }

    pub(crate) fn forget_tool(&self, name: &str) {
        self.lock().tools.retain(|t| t != name);
    }

    pub(crate) fn record_handler(&self, id: HandlerId) {
        self.lock().handlers.push(id);
    }

    /// Mark setup as successful and keep the cleanup it returned.
    pub(crate) fn activate(&self, cleanup: Option<Cleanup>) {
        let mut inner = self.lock();
        inner.cleanup = cleanup;
        inner.status = PluginStatus::Active;
    }

    /// Mark setup as failed and hand back what it installed so the caller
    /// can roll it back.
    pub(crate) fn fail(&self, reason: String) -> (Vec<String>, Vec<HandlerId>) {
        let mut inner = self.lock();
        inner.status = PluginStatus::Failed(reason);
        inner.cleanup = None;
        (
            std::mem::take(&mut inner.tools),
            std::mem::take(&mut inner.handlers),
        )
    }

    pub(crate) fn take_cleanup(&self) -> Option<Cleanup> {
        self.lock().cleanup.take()
    }

    pub(crate) fn mark_stopped(&self) {
        let mut inner = self.lock();
        if !matches!(inner.status, PluginStatus::Failed(_)) {
            inner.status = PluginStatus::Stopped;
        }
    }

    pub fn info(&self) -> PluginInfo {
        let inner = self.lock();
        PluginInfo {
            name: self.name.clone(),
            description: inner.description.clone(),
            status: inner.status.clone(),
            epoch: inner.epoch,
            tools: inner.tools.clone(),
        }
    }
}

/// A registered plugin together with its state.
#[derive(Clone)]
pub struct Registered {
    pub plugin: Arc<dyn Plugin>,
    pub state: Arc<PluginState>,
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Registered>,
    names: HashSet<String>,
    configs: BTreeMap<String, Value>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide the resolved configuration section for `name`. Must happen
    /// before that plugin is added.
    pub fn set_config(&mut self, name: impl Into<String>, config: Value) {
        self.configs.insert(name.into(), config);
    }

    pub fn add(&mut self, plugin: Arc<dyn Plugin>) -> Result<Arc<PluginState>> {
        let name = plugin.name().to_string();
        validate_name(&name)?;
        if !self.names.insert(name.clone()) {
            return Err(HearthError::DuplicatePlugin(name));
        }
        let config = self
            .configs
            .get(&name)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        let state = Arc::new(PluginState::new(name.clone(), config, plugin.description()));
        self.plugins.push(Registered {
            plugin,
            state: Arc::clone(&state),
        });
        debug!(plugin = %name, total = self.plugins.len(), "Plugin added");
        Ok(state)
    }

    pub fn get(&self, name: &str) -> Option<&Registered> {
        self.plugins.iter().find(|r| r.state.name() == name)
    }

    /// Registered plugins in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Registered> {
        self.plugins.iter()
    }

    /// Copy of the plugin set; later changes are not reflected.
    pub fn snapshot(&self) -> Vec<Registered> {
        self.plugins.clone()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "name must not be empty"
    } else if name.contains('/') {
        "name must not contain '/'"
    } else if name == CORE_NAMESPACE {
        "name is reserved for the host"
    } else {
        return Ok(());
    };
    Err(HearthError::InvalidPluginName {
        name: name.to_string(),
        reason,
    })
}
