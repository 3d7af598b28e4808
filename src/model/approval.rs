//! Durable approval requests underpinning the suspension protocol

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of decision an approval request is gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    HumanReview,
    BudgetIncrease,
    WorkflowCall,
}

impl ApprovalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HumanReview => "human_review",
            Self::BudgetIncrease => "budget_increase",
            Self::WorkflowCall => "workflow_call",
        }
    }
}

impl std::fmt::Display for ApprovalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Disposition of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for ApprovalStatus {
    fn from(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            "expired" => Self::Expired,
            _ => Self::Pending,
        }
    }
}

/// The discriminated payload carried by an approval request, shaped by its type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApprovalContext {
    HumanReview { llm_output: serde_json::Value },
    BudgetIncrease { requested_budget: i64, current_usage: i64 },
    WorkflowCall { workflow_ref: String },
}

/// A pending decision row that pauses a session until an external actor
/// approves or rejects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub session_id: String,
    pub node_id: String,
    #[serde(rename = "type")]
    pub type_: ApprovalType,
    pub status: ApprovalStatus,
    pub context: ApprovalContext,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_notes: Option<String>,
}

impl ApprovalRequest {
    pub fn new(
        session_id: impl Into<String>,
        node_id: impl Into<String>,
        type_: ApprovalType,
        context: ApprovalContext,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            node_id: node_id.into(),
            type_,
            status: ApprovalStatus::Pending,
            context,
            created_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
        }
    }

    pub fn approve(&mut self, approved_by: impl Into<String>, notes: Option<String>) {
        self.status = ApprovalStatus::Approved;
        self.resolved_at = Some(Utc::now());
        self.resolved_by = Some(approved_by.into());
        self.resolution_notes = notes;
    }

    pub fn reject(&mut self, rejected_by: impl Into<String>, notes: Option<String>) {
        self.status = ApprovalStatus::Rejected;
        self.resolved_at = Some(Utc::now());
        self.resolved_by = Some(rejected_by.into());
        self.resolution_notes = notes;
    }
}
