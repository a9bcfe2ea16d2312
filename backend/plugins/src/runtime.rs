//! Everything a running host shares with its plugins.

use hearth_bus::{Dispatcher, EventLog};
use hearth_core::event::{HALT, PLUGIN_REGISTER, PLUGIN_UNREGISTER};
use hearth_core::{Event, HearthError, Result, ToolRegistry};

use crate::cursor::CursorManager;
use crate::lifecycle::PhaseTracker;

pub(crate) struct Runtime {
    pub(crate) log: EventLog,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) tools: ToolRegistry,
    pub(crate) cursors: CursorManager,
    pub(crate) phase: PhaseTracker,
}

impl Runtime {
    /// The latest cursor is created here, before anything is published.
    pub(crate) fn new(trim_threshold: usize) -> Self {
        let log = EventLog::with_trim_threshold(trim_threshold);
        Self {
            dispatcher: Dispatcher::new(log.clone()),
            cursors: CursorManager::new(log.trailing_cursor()),
            log,
            tools: ToolRegistry::new(),
            phase: PhaseTracker::new(),
        }
    }

    /// Publish on behalf of a plugin or the embedding application. Only the
    /// host itself may publish lifecycle sentinels.
    pub(crate) fn publish(&self, event: Event) -> Result<u64> {
        if matches!(event.source.as_str(), PLUGIN_REGISTER | PLUGIN_UNREGISTER | HALT) {
            return Err(HearthError::ReservedEvent(event.source.to_string()));
        }
        self.log.publish(event)
    }
}
