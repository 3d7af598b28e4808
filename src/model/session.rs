//! Session and execution-state tracking

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::node::WorkflowDefinition;

/// Lifecycle status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    WaitingForHumanReview,
    WaitingForBudgetApproval,
    WaitingForWorkflowApproval,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::WaitingForHumanReview => "waiting_for_human_review",
            Self::WaitingForBudgetApproval => "waiting_for_budget_approval",
            Self::WaitingForWorkflowApproval => "waiting_for_workflow_approval",
        }
    }

    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            Self::WaitingForHumanReview
                | Self::WaitingForBudgetApproval
                | Self::WaitingForWorkflowApproval
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for SessionStatus {
    fn from(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "paused" => Self::Paused,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "waiting_for_human_review" => Self::WaitingForHumanReview,
            "waiting_for_budget_approval" => Self::WaitingForBudgetApproval,
            "waiting_for_workflow_approval" => Self::WaitingForWorkflowApproval,
            _ => Self::Running,
        }
    }
}

/// A single run of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub workflow_id: String,
    pub workflow_snapshot: WorkflowDefinition,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Session {
    pub fn new(workflow_id: impl Into<String>, workflow_snapshot: WorkflowDefinition) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            workflow_snapshot,
            status: SessionStatus::Running,
            created_at: now,
            updated_at: now,
            metadata: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Status of an individual node's execution within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    WaitingForApproval,
    WaitingForReview,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::WaitingForApproval => "waiting_for_approval",
            Self::WaitingForReview => "waiting_for_review",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted state of a single node execution, keyed by its qualified id
/// (e.g. `root.sub.llm1`) so nested groups never collide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    pub node_id: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_approval_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl NodeState {
    pub fn new(node_id: impl Into<String>, input: Value) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Running,
            input: Some(input),
            output: None,
            error: None,
            started_at: Some(Utc::now()),
            completed_at: None,
            retry_count: 0,
            pending_approval_id: None,
            metadata: None,
        }
    }

    pub fn mark_completed(&mut self, output: Value) {
        self.status = NodeStatus::Completed;
        self.output = Some(output);
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = NodeStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_waiting(&mut self, status: NodeStatus, approval_id: impl Into<String>) {
        self.status = status;
        self.pending_approval_id = Some(approval_id.into());
    }
}

/// Overall status of a session's execution state; mirrors `SessionStatus` but
/// tracked independently since execution state outlives approval detours.
pub type ExecutionStatus = SessionStatus;

/// The one execution state row owned by a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_pool_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub node_states: HashMap<String, NodeState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ExecutionState {
    pub fn new(session_id: impl Into<String>, budget_pool_id: Option<String>) -> Self {
        Self {
            session_id: session_id.into(),
            budget_pool_id,
            started_at: Utc::now(),
            completed_at: None,
            current_node_id: None,
            status: SessionStatus::Running,
            node_states: HashMap::new(),
            metadata: None,
        }
    }
}
