//! Hearth plugin host.
//!
//! Plugins are added to a [`HostBuilder`], which is consumed by
//! [`HostBuilder::run`]. Each plugin's `setup` runs once, in insertion order,
//! with a [`PluginContext`] through which it declares tools, sends and
//! listens for events, and issues namespaced event ids. [`Host::stop`] runs
//! the cleanups in the same order and shuts the bus down.

pub mod context;
pub mod cursor;
pub mod host;
mod lifecycle;
pub mod plugin;
pub mod registry;
mod runtime;
mod tools;

pub use context::{current, PluginContext};
pub use cursor::CursorManager;
pub use host::{Host, HostBuilder};
pub use plugin::{define_plugin, Cleanup, FnPlugin, Plugin, PluginInfo, PluginStatus};
pub use registry::{PluginRegistry, PluginState};
