//! Routes published events to registered handlers.
//!
//! A single dispatcher task reads the log through its own cursor, so events
//! reach handlers in publish order. `Sequential` handlers are awaited inline
//! before the next event is looked at; `Concurrent` handlers are spawned.
//! A handler may return an event, which is published on its behalf.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use hearth_core::{Event, EventId};

use crate::log::EventLog;

pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Option<Event>>>;
type HandlerFn = Arc<dyn Fn(Arc<Event>) -> HandlerFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerMode {
    /// Awaited by the dispatcher before it moves to the next event.
    Sequential,
    /// Spawned on its own task.
    Concurrent,
}

#[derive(Clone)]
struct Registered {
    id: HandlerId,
    mode: HandlerMode,
    f: HandlerFn,
}

/// Handler table plus the log it dispatches from. Cloning shares both.
#[derive(Clone)]
pub struct Dispatcher {
    log: EventLog,
    handlers: Arc<RwLock<HashMap<EventId, Vec<Registered>>>>,
    next_id: Arc<AtomicU64>,
}

impl Dispatcher {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Register `f` for every id in `sources`. Handlers for the same source
    /// run in registration order.
    pub fn handle<F>(&self, sources: &[EventId], mode: HandlerMode, f: F) -> HandlerId
    where
        F: Fn(Arc<Event>) -> HandlerFuture + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let f: HandlerFn = Arc::new(f);
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        for source in sources {
            handlers.entry(source.clone()).or_default().push(Registered {
                id,
                mode,
                f: Arc::clone(&f),
            });
        }
        debug!(handler = id.0, sources = sources.len(), ?mode, "Handler registered");
        id
    }

    /// Unregister a handler from every source it was attached to.
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        handlers.retain(|_, list| {
            let before = list.len();
            list.retain(|h| h.id != id);
            removed |= list.len() != before;
            !list.is_empty()
        });
        removed
    }

    /// Drop every handler. Handlers often capture handles that lead back to
    /// the dispatcher, so this is how such cycles are broken at shutdown.
    pub fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn handler_count(&self, source: &EventId) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .map_or(0, Vec::len)
    }

    fn matching(&self, source: &EventId) -> Vec<Registered> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    /// Start dispatching. Events published after this call returns are
    /// guaranteed to be seen. The task ends when the log is closed.
    pub fn spawn(&self) -> DispatcherHandle {
        let mut cursor = self.log.cursor();
        let this = self.clone();
        let task = tokio::spawn(async move {
            info!(from = cursor.position(), "Dispatcher started");
            while let Some(event) = cursor.next().await {
                for handler in this.matching(&event.source) {
                    let run = invoke(this.log.clone(), handler.f, Arc::clone(&event));
                    match handler.mode {
                        HandlerMode::Sequential => run.await,
                        HandlerMode::Concurrent => {
                            tokio::spawn(run);
                        }
                    }
                }
            }
            info!("Event log closed, dispatcher shutting down");
        });
        DispatcherHandle { task }
    }
}

async fn invoke(log: EventLog, f: HandlerFn, event: Arc<Event>) {
    let seq = event.seq;
    let source = event.source.clone();
    match AssertUnwindSafe(f(event)).catch_unwind().await {
        Ok(Ok(Some(emitted))) => {
            if let Err(e) = log.publish(emitted) {
                warn!(seq, event = %source, error = %e, "Could not publish handler output");
            }
        }
        Ok(Ok(None)) => {}
        Ok(Err(e)) => {
            warn!(seq, event = %source, error = %e, "Event handler failed");
        }
        Err(_) => {
            error!(seq, event = %source, "Event handler panicked");
        }
    }
}

/// Join handle of a running dispatcher.
pub struct DispatcherHandle {
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Wait for the dispatcher to finish (after the log is closed).
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "Dispatcher task ended abnormally");
        }
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
