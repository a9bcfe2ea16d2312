//! Plugin lifecycle: register and unregister phases.
//!
//! Both phases are driven by handlers on the bus. The register handler runs
//! every plugin's `setup` in insertion order and closes the phase with
//! `halt(Registering)`; the unregister handler runs the stored cleanups in
//! the same order and closes with `halt(Unregistering)`.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use hearth_bus::HandlerMode;
use hearth_core::{
    halt_event, plugin_register_event, plugin_unregister_event, HearthError, Phase, Result,
};

use crate::context::PluginContext;
use crate::registry::Registered;
use crate::runtime::Runtime;

/// Queryable current phase, plus the sequence number of every halt
/// sentinel published so far.
pub(crate) struct PhaseTracker {
    tx: watch::Sender<Phase>,
    halts: watch::Sender<BTreeMap<Phase, u64>>,
}

impl PhaseTracker {
    pub(crate) fn new() -> Self {
        Self {
            tx: watch::Sender::new(Phase::Created),
            halts: watch::Sender::new(BTreeMap::new()),
        }
    }

    pub(crate) fn get(&self) -> Phase {
        *self.tx.borrow()
    }

    pub(crate) fn set(&self, phase: Phase) {
        let previous = self.tx.send_replace(phase);
        debug!(from = %previous, to = %phase, "Phase changed");
    }

    /// Resolve once the phase is `phase` or later.
    pub(crate) async fn wait_until(&self, phase: Phase) -> Result<Phase> {
        let mut rx = self.tx.subscribe();
        let reached = rx
            .wait_for(|current| *current >= phase)
            .await
            .map_err(|_| HearthError::BusClosed(format!("phase tracker dropped before {phase}")))?;
        Ok(*reached)
    }

    pub(crate) fn record_halt(&self, phase: Phase, seq: u64) {
        self.halts.send_modify(|halts| {
            halts.insert(phase, seq);
        });
        debug!(%phase, seq, "Halt published");
    }

    /// Sequence number of `halt(phase)`, once it has been published.
    pub(crate) async fn halt_seq(&self, phase: Phase) -> Result<u64> {
        let mut rx = self.halts.subscribe();
        let halts = rx
            .wait_for(|halts| halts.contains_key(&phase))
            .await
            .map_err(|_| HearthError::BusClosed(format!("phase tracker dropped before halt({phase})")))?;
        halts
            .get(&phase)
            .copied()
            .ok_or_else(|| HearthError::BusClosed(format!("halt({phase}) was never published")))
    }
}

/// Publish `halt(phase)` and remember where it landed.
fn publish_halt(runtime: &Runtime, phase: Phase) -> Result<u64> {
    let seq = runtime.log.publish(halt_event().with(phase)?)?;
    runtime.phase.record_halt(phase, seq);
    Ok(seq)
}

/// Install the register and unregister handlers for `plugins`.
pub(crate) fn install(runtime: &Arc<Runtime>, plugins: Vec<Registered>) {
    let plugins = Arc::new(plugins);

    let rt = Arc::clone(runtime);
    let list = Arc::clone(&plugins);
    runtime.dispatcher.handle(
        &[plugin_register_event().id().clone()],
        HandlerMode::Sequential,
        move |_event| {
            let rt = Arc::clone(&rt);
            let list = Arc::clone(&list);
            async move {
                if rt.phase.get() != Phase::Registering {
                    warn!(phase = %rt.phase.get(), "Ignoring register sentinel outside the register phase");
                    return Ok(None);
                }
                info!(plugins = list.len(), "Registering plugins");
                for entry in list.iter() {
                    register(&rt, entry);
                }
                let seq = publish_halt(&rt, Phase::Registering)?;
                // The host has nothing left to drain up to this point; later
                // streams and barriers start after the halt.
                rt.cursors.advance_to(seq + 1);
                rt.phase.set(Phase::Running);
                Ok(None)
            }
            .boxed()
        },
    );

    let rt = Arc::clone(runtime);
    runtime.dispatcher.handle(
        &[plugin_unregister_event().id().clone()],
        HandlerMode::Sequential,
        move |_event| {
            let rt = Arc::clone(&rt);
            let list = Arc::clone(&plugins);
            async move {
                if rt.phase.get() != Phase::Unregistering {
                    warn!(phase = %rt.phase.get(), "Ignoring unregister sentinel outside the unregister phase");
                    return Ok(None);
                }
                info!(plugins = list.len(), "Unregistering plugins");
                for entry in list.iter() {
                    unregister(&rt, entry);
                }
                rt.phase.set(Phase::Stopped);
                publish_halt(&rt, Phase::Unregistering)?;
                Ok(None)
            }
            .boxed()
        },
    );
}

/// Run one plugin's setup. A failure is confined to that plugin: whatever
/// it installed before failing is removed again.
fn register(runtime: &Arc<Runtime>, entry: &Registered) {
    let Registered { plugin, state } = entry;
    let ctx = PluginContext::new(Arc::clone(state), Arc::clone(runtime));
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| ctx.enter(|| plugin.setup(&ctx))));
    let reason = match outcome {
        Ok(Ok(cleanup)) => {
            state.activate(cleanup);
            let info = state.info();
            info!(
                plugin = %info.name,
                tools = info.tools.len(),
                description = info.description.as_deref().unwrap_or(""),
                "Plugin active"
            );
            return;
        }
        Ok(Err(e)) => HearthError::Setup {
            plugin: state.name().to_string(),
            message: format!("{e:#}"),
        }
        .to_string(),
        Err(payload) => format!("setup panicked: {}", panic_message(payload.as_ref())),
    };

    error!(plugin = %state.name(), reason = %reason, "Plugin setup failed, rolling back");
    let (tools, handlers) = state.fail(reason);
    for tool in &tools {
        runtime.tools.remove(tool);
    }
    for handler in handlers {
        runtime.dispatcher.remove(handler);
    }
    debug!(plugin = %state.name(), tools = tools.len(), "Rollback complete");
}

/// Run one plugin's cleanup, then deactivate its context.
fn unregister(runtime: &Arc<Runtime>, entry: &Registered) {
    let state = &entry.state;
    if let Some(cleanup) = state.take_cleanup() {
        let ctx = PluginContext::new(Arc::clone(state), Arc::clone(runtime));
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| ctx.enter(cleanup))) {
            error!(
                plugin = %state.name(),
                panic = %panic_message(payload.as_ref()),
                "Plugin cleanup panicked"
            );
        }
    }
    state.mark_stopped();
    debug!(plugin = %state.name(), status = ?state.status(), "Plugin stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_phase_tracker_waits_for_later_phase() {
        let tracker = Arc::new(PhaseTracker::new());
        assert_eq!(tracker.get(), Phase::Created);

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait_until(Phase::Running).await })
        };
        tracker.set(Phase::Registering);
        tracker.set(Phase::Running);
        let reached = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reached, Phase::Running);
    }

    #[tokio::test]
    async fn test_phase_tracker_already_past() {
        let tracker = PhaseTracker::new();
        tracker.set(Phase::Stopped);
        assert_eq!(tracker.wait_until(Phase::Running).await.unwrap(), Phase::Stopped);
    }

    #[tokio::test]
    async fn test_halt_seq_resolves_once_recorded() {
        let tracker = Arc::new(PhaseTracker::new());
        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.halt_seq(Phase::Unregistering).await })
        };
        tracker.record_halt(Phase::Registering, 3);
        tracker.record_halt(Phase::Unregistering, 9);
        let seq = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(seq, 9);
        assert_eq!(tracker.halt_seq(Phase::Registering).await.unwrap(), 3);
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload = panic::catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static message");
        let payload = panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 42");
    }
}
