//! Bus event tracer.
//!
//! Writes every event it is given to the `hearth_events` target at debug
//! level with the payload redacted, so the JSON log doubles as an audit
//! trail of the bus when debug output is enabled.

use hearth_bus::Cursor;
use hearth_core::Event;
use tracing::debug;

use crate::redact::redact_payload;

pub fn trace_event(event: &Event) {
    let payload = redact_payload(&event.data);
    debug!(
        target: "hearth_events",
        seq = event.seq,
        source = %event.source,
        timestamp = %event.timestamp.to_rfc3339(),
        payload = %payload,
        "Bus event"
    );
}

/// Trace events from `cursor` until the log is closed. Returns how many
/// were traced.
pub async fn trace_stream(mut cursor: Cursor) -> u64 {
    let mut traced = 0;
    while let Some(event) = cursor.next().await {
        trace_event(&event);
        traced += 1;
    }
    traced
}
