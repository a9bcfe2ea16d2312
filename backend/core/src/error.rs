use thiserror::Error;

/// Top-level error type for the Hearth plugin host.
#[derive(Debug, Error)]
pub enum HearthError {
    #[error("tool '{0}' is already declared")]
    DuplicateTool(String),

    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    #[error("no active plugin in the current context")]
    NoActivePlugin,

    #[error("plugin '{0}' is already registered")]
    DuplicatePlugin(String),

    #[error("invalid plugin name '{name}': {reason}")]
    InvalidPluginName { name: String, reason: &'static str },

    #[error("invalid event label '{0}': labels must be non-empty and must not contain '/'")]
    InvalidEventLabel(String),

    #[error("plugin '{plugin}' does not own tool '{tool}'")]
    NotOwner { plugin: String, tool: String },

    #[error("event '{0}' is reserved for the host")]
    ReservedEvent(String),

    #[error("no Tokio runtime available; run() must be called from within a runtime")]
    NoRuntime,

    #[error("event bus closed: {0}")]
    BusClosed(String),

    #[error("tool '{name}' failed: {message}")]
    ToolFailed { name: String, message: String },

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("setup of plugin '{plugin}' failed: {message}")]
    Setup { plugin: String, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = HearthError> = std::result::Result<T, E>;
