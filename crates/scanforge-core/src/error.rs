// Error types shared across the backend

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in the orchestration core
#[derive(Debug, Error)]
pub enum CoreError {
    /// Tool lookup failed
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Parser lookup failed
    #[error("Parser not found: {0}")]
    ParserNotFound(String),

    /// Job lookup failed
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// Workflow lookup failed
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// Workflow run lookup failed
    #[error("Workflow run not found: {0}")]
    RunNotFound(Uuid),

    /// A job state transition that the state machine forbids
    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Workflow definition failed validation
    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// Sub-process execution error
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Tool execution exceeded its deadline
    #[error("Execution timed out after {0} seconds")]
    Timeout(u64),

    /// Execution was cancelled by the owner
    #[error("Execution cancelled")]
    Cancelled,

    /// Storage gateway error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Encryption collaborator error
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        CoreError::Storage(msg.into())
    }

    /// Create a tool execution error
    pub fn execution(msg: impl Into<String>) -> Self {
        CoreError::ToolExecution(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        CoreError::Internal(msg.into())
    }
}
