//! Hearth event bus.
//!
//! Events are appended to a single [`EventLog`] and receive a monotonically
//! increasing sequence number. Every consumer reads the log through its own
//! [`Cursor`], so any number of consumers observe the same total order
//! independently. The [`Dispatcher`] is one such consumer: it routes each
//! event to the handlers registered for its source.

pub mod dispatch;
pub mod log;

pub use dispatch::{Dispatcher, DispatcherHandle, HandlerFuture, HandlerId, HandlerMode};
pub use log::{Cursor, EventLog, Position, Until, DEFAULT_TRIM_THRESHOLD};
