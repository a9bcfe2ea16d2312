use serde::{Deserialize, Serialize};

use crate::event::EventType;

pub const TOOL_CALL: &str = "core/tool-call";
pub const TOOL_RESULT: &str = "core/tool-result";

/// A request to invoke a tool. `id` is chosen by the caller and echoed back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// The answer to a [`ToolCall`], correlated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
    #[serde(flatten)]
    pub outcome: ToolOutcome,
}

/// Serialized as either `{"result": ...}` or `{"error": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Result(serde_json::Value),
    Error(ToolFailure),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No tool with the requested name is declared.
    NotFound,
    /// The tool returned an error.
    Failed,
    /// The tool panicked.
    Panicked,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    pub fn succeeded(self, result: serde_json::Value) -> ToolResult {
        ToolResult {
            id: self.id,
            name: self.name,
            args: self.args,
            outcome: ToolOutcome::Result(result),
        }
    }

    pub fn failed(self, kind: FailureKind, message: impl Into<String>) -> ToolResult {
        ToolResult {
            id: self.id,
            name: self.name,
            args: self.args,
            outcome: ToolOutcome::Error(ToolFailure {
                kind,
                message: message.into(),
            }),
        }
    }
}

impl ToolResult {
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Result(_))
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            ToolOutcome::Result(v) => Some(v),
            ToolOutcome::Error(_) => None,
        }
    }
}

pub fn tool_call_event() -> EventType<ToolCall> {
    EventType::new(TOOL_CALL)
}

pub fn tool_result_event() -> EventType<ToolResult> {
    EventType::new(TOOL_RESULT)
}
