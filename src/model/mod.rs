//! Data model for the workflow runtime
//!
//! Recursive value-type algebras (node message types, transform expressions)
//! are represented as tagged enums, one variant per `type`/`kind` discriminant,
//! rather than as an open class hierarchy.

pub mod approval;
pub mod budget;
pub mod llm;
pub mod node;
pub mod session;
pub mod transform;

pub use approval::{ApprovalContext, ApprovalRequest, ApprovalStatus, ApprovalType};
pub use budget::{BudgetPool, BudgetPoolStatus};
pub use llm::{LlmExecutionRecord, ProviderToolCall, ToolCallLog, Usage};
pub use node::{Edge, Node, NodeMessageType, ObjectField, StoredWorkflow, WorkflowDefinition};
pub use session::{ExecutionState, NodeState, NodeStatus, Session, SessionStatus};
pub use transform::TransformExpr;
