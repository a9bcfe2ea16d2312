//! Core types shared by the Hearth plugin host: events, tool descriptors,
//! the tool call protocol and the error taxonomy.

pub mod error;
pub mod event;
pub mod message;
pub mod tools;
pub mod traits;

pub use error::{HearthError, Result};
pub use event::{
    halt_event, is_lifecycle_sentinel, plugin_register_event, plugin_unregister_event, Event,
    EventId, EventType, Phase,
};
pub use message::{
    tool_call_event, tool_result_event, FailureKind, ToolCall, ToolFailure, ToolOutcome,
    ToolResult,
};
pub use tools::{Explanation, Tool, ToolRegistry};
pub use traits::ToolHandler;
