// Error types for the agent runtime

use thiserror::Error;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur while driving a run
#[derive(Debug, Error)]
pub enum AgentError {
    /// LLM driver error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Tool execution error that escaped the tool boundary
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Session store error
    #[error("Session store error: {0}")]
    Store(String),

    /// Event emission error
    #[error("Wire error: {0}")]
    Wire(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Run was cancelled via the abort signal
    #[error("Run cancelled: {reason}")]
    Cancelled { reason: String },

    /// Run not found in the store
    #[error("Run not found: {0}")]
    RunNotFound(uuid::Uuid),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AgentError {
    /// Create an LLM error
    pub fn llm(msg: impl Into<String>) -> Self {
        AgentError::Llm(msg.into())
    }

    /// Create a tool execution error
    pub fn tool(msg: impl Into<String>) -> Self {
        AgentError::ToolExecution(msg.into())
    }

    /// Create a session store error
    pub fn store(msg: impl Into<String>) -> Self {
        AgentError::Store(msg.into())
    }

    /// Create a wire error
    pub fn wire(msg: impl Into<String>) -> Self {
        AgentError::Wire(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        AgentError::Configuration(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(reason: impl Into<String>) -> Self {
        AgentError::Cancelled {
            reason: reason.into(),
        }
    }

    /// Whether this error represents cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled { .. })
    }
}
