//! Error types for the agent crate.

use thiserror::Error;

/// Result type alias using the agent error type.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Error type for agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model call failed after all retries.
    #[error("Model error: {0}")]
    Model(String),

    /// A task parameter is missing or has the wrong shape.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The model reply could not be interpreted.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Memory rejected an update.
    #[error("Memory error: {0}")]
    Memory(#[from] inkwell_memory::MemoryError),

    /// Configuration is invalid.
    #[error("Configuration error: {}", .0.join("; "))]
    Config(Vec<String>),

    /// `execute` was called before a successful `initialize`.
    #[error("Agent '{0}' is not initialized")]
    NotInitialized(String),

    /// No built-in or registered agent has this type name.
    #[error("Unknown agent type: {0}")]
    UnknownAgentType(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Task was cancelled.
    #[error("Task cancelled")]
    Cancelled,
}

impl AgentError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// A missing required task parameter.
    pub fn missing_param(name: &str) -> Self {
        Self::InvalidInput(format!("missing required parameter '{name}'"))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
