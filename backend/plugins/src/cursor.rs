//! Stream cursor manager.
//!
//! Owns the host's single "latest unconsumed" cursor. Every consumer that
//! needs to look at history from the last barrier onward gets its own fork
//! of it, so nobody consumes events that somebody else still needs.
//!
//! The latest cursor itself should be a trailing one
//! ([`EventLog::trailing_cursor`](hearth_bus::EventLog::trailing_cursor)):
//! only its forks hold events back from trimming.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

use hearth_bus::Cursor;
use hearth_core::is_lifecycle_sentinel;

pub struct CursorManager {
    latest: Mutex<Cursor>,
    /// Serializes `wait_for` calls.
    barrier: tokio::sync::Mutex<()>,
}

impl CursorManager {
    pub fn new(latest: Cursor) -> Self {
        Self {
            latest: Mutex::new(latest),
            barrier: tokio::sync::Mutex::new(()),
        }
    }

    fn latest(&self) -> MutexGuard<'_, Cursor> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fork the latest cursor, hand one side to `handler`, keep the other as
    /// the new latest and await the handler.
    ///
    /// Once the handler is done the kept side is moved up to wherever the
    /// handed-out fork stopped, so consecutive calls observe one gapless,
    /// duplicate-free ordering. Never returns if the handler never does.
    pub async fn wait_for<F, Fut, R>(&self, handler: F) -> R
    where
        F: FnOnce(Cursor) -> Fut,
        Fut: Future<Output = R>,
    {
        let _serial = self.barrier.lock().await;
        let fork = self.latest().tee();
        let tracker = fork.tracker();
        trace!(from = fork.position(), "wait_for: fork handed out");
        let out = handler(fork).await;
        let reached = tracker.get();
        self.latest().skip_to(reached);
        trace!(to = reached, "wait_for: latest advanced");
        out
    }

    /// Move the latest cursor forward to `seq`. Never moves it backwards.
    pub fn advance_to(&self, seq: u64) {
        self.latest().skip_to(seq);
        trace!(to = seq, "latest advanced");
    }

    /// A fork of the latest cursor that hides the register/unregister
    /// sentinels.
    pub fn stream(&self) -> Cursor {
        self.latest().tee().filter(|e| !is_lifecycle_sentinel(e))
    }

    /// Position of the latest cursor.
    pub fn position(&self) -> u64 {
        self.latest().position()
    }
}
