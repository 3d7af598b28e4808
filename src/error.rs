//! Error types for the workflow runtime
//!
//! Provides a single crate-wide error type for all runtime operations.

use std::fmt;

/// Result type alias for workflow runtime operations
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Main error type for workflow runtime operations
#[derive(Debug)]
pub enum WorkflowError {
    /// Referenced workflow does not exist in the store
    WorkflowNotFound(String),

    /// Referenced session does not exist in the store
    SessionNotFound(String),

    /// A group's traversal revisited a node it had already visited
    CycleDetected(String),

    /// A group's traversal reached a node with no outgoing edge
    DanglingNode(String),

    /// Node type is declared but not executable (stream/generator)
    Unimplemented(String),

    /// Transform expression evaluation failed
    TransformError(TransformErrorKind),

    /// Tool execution failed
    ToolExecution(String),

    /// Budget pool has insufficient remaining budget
    BudgetExhausted(String),

    /// Budget pool is not active
    PoolInactive(String),

    /// Budget pool does not exist
    PoolNotFound(String),

    /// LLM provider call failed
    LlmError(String),

    /// A human-review gated node was resumed with a rejection
    ReviewRejected(String),

    /// Referenced approval request does not exist
    ApprovalNotFound(String),

    /// Resume was attempted on an approval that isn't approved
    NotApproved(String),

    /// Distinguished suspension signal; not a failure
    Suspended(String),

    /// Configuration error
    Config(String),

    /// IO error
    Io(std::io::Error),

    /// Serialization/deserialization error
    Serde(serde_json::Error),

    /// SQL error
    Sqlx(sqlx::Error),

    /// Generic wrapped error
    Other(anyhow::Error),
}

/// Sub-kinds of transform evaluation failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformErrorKind {
    NoMatchingBranch { tag: String },
    TypeMismatch { expected: &'static str, path: String },
    UnknownExprKind(String),
}

impl fmt::Display for TransformErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMatchingBranch { tag } => {
                write!(f, "no branch matched tag '{}'", tag)
            }
            Self::TypeMismatch { expected, path } => {
                write!(f, "expected {} at path '{}'", expected, path)
            }
            Self::UnknownExprKind(kind) => write!(f, "unknown expression kind '{}'", kind),
        }
    }
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotFound(id) => write!(f, "workflow not found: {}", id),
            Self::SessionNotFound(id) => write!(f, "session not found: {}", id),
            Self::CycleDetected(node) => write!(f, "cycle detected at node: {}", node),
            Self::DanglingNode(node) => write!(f, "dangling node with no outgoing edge: {}", node),
            Self::Unimplemented(kind) => write!(f, "not implemented: {}", kind),
            Self::TransformError(kind) => write!(f, "transform error: {}", kind),
            Self::ToolExecution(msg) => write!(f, "tool execution error: {}", msg),
            Self::BudgetExhausted(msg) => write!(f, "budget exhausted: {}", msg),
            Self::PoolInactive(id) => write!(f, "budget pool inactive: {}", id),
            Self::PoolNotFound(id) => write!(f, "budget pool not found: {}", id),
            Self::LlmError(msg) => write!(f, "LLM error: {}", msg),
            Self::ReviewRejected(node) => write!(f, "human review rejected node: {}", node),
            Self::ApprovalNotFound(id) => write!(f, "approval request not found: {}", id),
            Self::NotApproved(id) => write!(f, "approval request not approved: {}", id),
            Self::Suspended(id) => write!(f, "suspended pending approval: {}", id),
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Serde(err) => write!(f, "serialization error: {}", err),
            Self::Sqlx(err) => write!(f, "SQL error: {}", err),
            Self::Other(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for WorkflowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Serde(err) => Some(err),
            Self::Sqlx(err) => Some(err),
            _ => None,
        }
    }
}

impl WorkflowError {
    /// True if this error is the distinguished suspension signal rather than a true failure.
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended(_))
    }
}

impl From<std::io::Error> for WorkflowError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde(err)
    }
}

impl From<sqlx::Error> for WorkflowError {
    fn from(err: sqlx::Error) -> Self {
        Self::Sqlx(err)
    }
}

impl From<anyhow::Error> for WorkflowError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err)
    }
}

impl From<String> for WorkflowError {
    fn from(msg: String) -> Self {
        Self::Other(anyhow::anyhow!(msg))
    }
}

impl From<&str> for WorkflowError {
    fn from(msg: &str) -> Self {
        Self::Other(anyhow::anyhow!(msg.to_string()))
    }
}
