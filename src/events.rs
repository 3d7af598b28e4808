//! Execution event logging for observability (§4.7/A4)
//!
//! Every state transition emits both a `tracing` event and an entry in this
//! module's in-process [`EventLog`], mirroring this codebase's
//! `ExecutionEvent` pattern. The log is diagnostic only: it never gates
//! control flow or substitutes for persisted state.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// One observable transition in the runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    SessionStarted { session_id: String, workflow_id: String, timestamp: i64 },
    SessionCompleted { session_id: String, timestamp: i64 },
    SessionFailed { session_id: String, error: String, timestamp: i64 },
    SessionSuspended { session_id: String, approval_id: String, timestamp: i64 },
    NodeStarted { session_id: String, node_id: String, timestamp: i64 },
    NodeCompleted { session_id: String, node_id: String, timestamp: i64 },
    NodeFailed { session_id: String, node_id: String, error: String, timestamp: i64 },
    BudgetConsumed { pool_id: String, amount: i64, remaining: i64, timestamp: i64 },
    BudgetExhausted { pool_id: String, timestamp: i64 },
    ApprovalRequested { approval_id: String, session_id: String, node_id: String, timestamp: i64 },
    ApprovalResolved { approval_id: String, approved: bool, timestamp: i64 },
}

impl ExecutionEvent {
    pub fn session_started(session_id: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        Self::SessionStarted { session_id: session_id.into(), workflow_id: workflow_id.into(), timestamp: Utc::now().timestamp() }
    }

    pub fn session_completed(session_id: impl Into<String>) -> Self {
        Self::SessionCompleted { session_id: session_id.into(), timestamp: Utc::now().timestamp() }
    }

    pub fn session_failed(session_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::SessionFailed { session_id: session_id.into(), error: error.into(), timestamp: Utc::now().timestamp() }
    }

    pub fn session_suspended(session_id: impl Into<String>, approval_id: impl Into<String>) -> Self {
        Self::SessionSuspended { session_id: session_id.into(), approval_id: approval_id.into(), timestamp: Utc::now().timestamp() }
    }

    pub fn node_started(session_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self::NodeStarted { session_id: session_id.into(), node_id: node_id.into(), timestamp: Utc::now().timestamp() }
    }

    pub fn node_completed(session_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self::NodeCompleted { session_id: session_id.into(), node_id: node_id.into(), timestamp: Utc::now().timestamp() }
    }

    pub fn node_failed(session_id: impl Into<String>, node_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeFailed { session_id: session_id.into(), node_id: node_id.into(), error: error.into(), timestamp: Utc::now().timestamp() }
    }

    pub fn budget_consumed(pool_id: impl Into<String>, amount: i64, remaining: i64) -> Self {
        Self::BudgetConsumed { pool_id: pool_id.into(), amount, remaining, timestamp: Utc::now().timestamp() }
    }

    pub fn budget_exhausted(pool_id: impl Into<String>) -> Self {
        Self::BudgetExhausted { pool_id: pool_id.into(), timestamp: Utc::now().timestamp() }
    }

    pub fn approval_requested(approval_id: impl Into<String>, session_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self::ApprovalRequested { approval_id: approval_id.into(), session_id: session_id.into(), node_id: node_id.into(), timestamp: Utc::now().timestamp() }
    }

    pub fn approval_resolved(approval_id: impl Into<String>, approved: bool) -> Self {
        Self::ApprovalResolved { approval_id: approval_id.into(), approved, timestamp: Utc::now().timestamp() }
    }
}

/// In-process, append-only buffer of [`ExecutionEvent`]s for introspection
/// and tests. Bounded only by process lifetime; callers that need
/// durability should rely on the store instead.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, event: ExecutionEvent) {
        self.events.lock().await.push(event);
    }

    pub async fn snapshot(&self) -> Vec<ExecutionEvent> {
        self.events.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
