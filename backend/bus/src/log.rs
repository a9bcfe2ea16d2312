//! Append-only event log with independently positioned cursors.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;
use tracing::{debug, trace};

use hearth_core::{Event, HearthError, Result};

/// Number of retained events above which the log drops entries that every
/// live cursor has already consumed.
pub const DEFAULT_TRIM_THRESHOLD: usize = 1024;

type Predicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Head {
    next_seq: u64,
    closed: bool,
}

struct LogState {
    /// Sequence number of `entries[0]`.
    base: u64,
    entries: VecDeque<Arc<Event>>,
    next_seq: u64,
    closed: bool,
    cursors: Vec<Tracked>,
}

/// A registered cursor position. Trailing cursors do not hold entries back
/// from trimming; one that falls behind the retained window resumes at its
/// start.
struct Tracked {
    position: Weak<AtomicU64>,
    pins: bool,
}

struct Inner {
    state: Mutex<LogState>,
    head: watch::Sender<Head>,
    trim_threshold: usize,
}

/// Single ordered history of every event published on the bus.
///
/// Cloning yields another handle to the same log.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<Inner>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_trim_threshold(DEFAULT_TRIM_THRESHOLD)
    }

    pub fn with_trim_threshold(trim_threshold: usize) -> Self {
        let (head, _) = watch::channel(Head {
            next_seq: 0,
            closed: false,
        });
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LogState {
                    base: 0,
                    entries: VecDeque::new(),
                    next_seq: 0,
                    closed: false,
                    cursors: Vec::new(),
                }),
                head,
                trim_threshold: trim_threshold.max(1),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event and return its sequence number.
    pub fn publish(&self, mut event: Event) -> Result<u64> {
        let mut state = self.lock();
        if state.closed {
            return Err(HearthError::BusClosed(format!(
                "cannot publish '{}'",
                event.source
            )));
        }
        let seq = state.next_seq;
        event.seq = seq;
        trace!(seq, event = %event.source, "Publishing event");
        state.entries.push_back(Arc::new(event));
        state.next_seq += 1;
        if state.entries.len() > self.inner.trim_threshold {
            Self::trim(&mut state);
        }
        // Sent under the lock so the head never moves backwards.
        self.inner.head.send_replace(Head {
            next_seq: state.next_seq,
            closed: false,
        });
        Ok(seq)
    }

    /// Drop entries below the lowest live pinning cursor position.
    fn trim(state: &mut LogState) {
        state.cursors.retain(|t| t.position.strong_count() > 0);
        let low_water = state
            .cursors
            .iter()
            .filter(|t| t.pins)
            .filter_map(|t| t.position.upgrade())
            .map(|p| p.load(Ordering::Acquire))
            .min()
            .unwrap_or(state.next_seq);
        let mut dropped = 0usize;
        while state.base < low_water && state.entries.pop_front().is_some() {
            state.base += 1;
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, base = state.base, "Trimmed event log");
        }
    }

    /// A cursor that observes every event published from now on.
    pub fn cursor(&self) -> Cursor {
        let mut state = self.lock();
        let at = state.next_seq;
        self.register_cursor(&mut state, at, None, true)
    }

    /// Like [`cursor`](Self::cursor), but the cursor never keeps entries
    /// from being trimmed. If it falls out of the retained window it skips
    /// ahead to the oldest retained entry. Forks taken from it with
    /// [`Cursor::tee`] pin as usual.
    pub fn trailing_cursor(&self) -> Cursor {
        let mut state = self.lock();
        let at = state.next_seq;
        self.register_cursor(&mut state, at, None, false)
    }

    fn register_cursor(
        &self,
        state: &mut LogState,
        at: u64,
        filter: Option<Predicate>,
        pins: bool,
    ) -> Cursor {
        let position = Arc::new(AtomicU64::new(at));
        state.cursors.push(Tracked {
            position: Arc::downgrade(&position),
            pins,
        });
        Cursor {
            log: self.clone(),
            position,
            head: self.inner.head.subscribe(),
            filter,
        }
    }

    /// Refuse further publishes. Cursors drain what is left and then end.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        self.inner.head.send_replace(Head {
            next_seq: state.next_seq,
            closed: true,
        });
        debug!(next_seq = state.next_seq, "Event log closed");
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Sequence number the next published event will receive.
    pub fn next_seq(&self) -> u64 {
        self.lock().next_seq
    }

    /// Number of events currently retained in memory.
    pub fn retained(&self) -> usize {
        self.lock().entries.len()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("EventLog")
            .field("base", &state.base)
            .field("next_seq", &state.next_seq)
            .field("closed", &state.closed)
            .finish()
    }
}

/// Forward-only, replay-free view over the log from its creation point.
pub struct Cursor {
    log: EventLog,
    position: Arc<AtomicU64>,
    head: watch::Receiver<Head>,
    filter: Option<Predicate>,
}

impl Cursor {
    /// Sequence number of the next event this cursor will look at.
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    /// Read-only handle on this cursor's position that stays valid after
    /// the cursor is moved or wrapped.
    pub fn tracker(&self) -> Position {
        Position(Arc::clone(&self.position))
    }

    /// Skip forward to `seq` without yielding the events in between.
    /// Never moves backwards and never past the head of the log.
    pub fn skip_to(&mut self, seq: u64) {
        let state = self.log.lock();
        let target = seq.min(state.next_seq);
        if target > self.position() {
            self.position.store(target, Ordering::Release);
        }
    }

    /// Fork into a second cursor at the same position. Both observe exactly
    /// the same future events; consuming one does not advance the other.
    pub fn tee(&self) -> Cursor {
        let mut state = self.log.lock();
        let at = self.position().max(state.base);
        self.log.register_cursor(&mut state, at, self.filter.clone(), true)
    }

    /// Keep only events matching `pred`, on top of any existing filter.
    pub fn filter(mut self, pred: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Cursor {
        self.filter = Some(match self.filter.take() {
            Some(prev) => Arc::new(move |e: &Event| prev(e) && pred(e)),
            None => Arc::new(pred),
        });
        self
    }

    /// Stop after the first event matching `sentinel` (which is yielded).
    pub fn until(self, sentinel: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Until {
        Until {
            cursor: self,
            sentinel: Box::new(sentinel),
            done: false,
        }
    }

    fn accepts(&self, event: &Event) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    /// Take the next already-published event, if any, without waiting.
    pub fn try_next(&mut self) -> Option<Arc<Event>> {
        loop {
            let event = {
                let state = self.log.lock();
                let pos = self.position().max(state.base);
                if pos >= state.next_seq {
                    return None;
                }
                let idx = (pos - state.base) as usize;
                let event = Arc::clone(&state.entries[idx]);
                self.position.store(pos + 1, Ordering::Release);
                event
            };
            if self.accepts(&event) {
                return Some(event);
            }
        }
    }

    /// Wait for the next event. Returns `None` once the log is closed and
    /// everything published before closing has been read.
    pub async fn next(&mut self) -> Option<Arc<Event>> {
        loop {
            if let Some(event) = self.try_next() {
                return Some(event);
            }
            let pos = self.position();
            let ready = self
                .head
                .wait_for(|h| h.next_seq > pos || h.closed)
                .await
                .map(|h| *h);
            match ready {
                Ok(head) if head.next_seq > pos => continue,
                // Closed (or sender gone): one last drain for a racing publish.
                _ => return self.try_next(),
            }
        }
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("position", &self.position())
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

/// Observes the position of a cursor owned elsewhere.
#[derive(Debug, Clone)]
pub struct Position(Arc<AtomicU64>);

impl Position {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// A cursor bounded by a sentinel event.
pub struct Until {
    cursor: Cursor,
    sentinel: Box<dyn Fn(&Event) -> bool + Send + Sync>,
    done: bool,
}

impl Until {
    pub async fn next(&mut self) -> Option<Arc<Event>> {
        if self.done {
            return None;
        }
        let event = self.cursor.next().await?;
        if (self.sentinel)(&event) {
            self.done = true;
        }
        Some(event)
    }

    /// Collect events up to and including the sentinel. If the log closes
    /// first, whatever was observed is returned.
    pub async fn collect(mut self) -> Vec<Arc<Event>> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }

    pub fn into_inner(self) -> Cursor {
        self.cursor
    }
}
