//! Structured logging for Hearth.
//!
//! Console and optional daily-rolling JSON file output, plus a tracer that
//! writes bus events to the log with sensitive payload fields redacted.

pub mod event_tracer;
pub mod logger;
pub mod redact;

pub use event_tracer::{trace_event, trace_stream};
pub use logger::{init_logger, LogGuard};
pub use redact::{redact_payload, redact_sensitive_data};
