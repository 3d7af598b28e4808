//! Store contract consumed by the core (§6)
//!
//! External collaborators implement `Store` against whatever backend they
//! like; [`sqlite`] ships a `sqlx`-backed reference implementation.

pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{
    ApprovalRequest, ApprovalStatus, BudgetPool, ExecutionState, LlmExecutionRecord, NodeState,
    Session, StoredWorkflow, ToolCallLog,
};

/// Generic list options shared by every `list_*` operation.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// A transaction handle. Stores that don't support transactions natively may
/// implement this as a no-op that commits immediately on `commit`.
#[async_trait]
pub trait Transaction: Send {
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// The full store contract the runtime depends on. Grouped by entity family
/// exactly as in the persisted-layout spec.
#[async_trait]
pub trait Store: Send + Sync {
    // -- workflows --
    async fn save_workflow(&self, workflow: &StoredWorkflow) -> Result<()>;
    async fn get_workflow(&self, id: &str) -> Result<Option<StoredWorkflow>>;
    async fn list_workflows(&self, opts: &ListOptions) -> Result<Vec<StoredWorkflow>>;
    async fn update_workflow(&self, workflow: &StoredWorkflow) -> Result<()>;
    async fn delete_workflow(&self, id: &str) -> Result<()>;

    // -- sessions --
    async fn create_session(&self, session: &Session) -> Result<()>;
    async fn get_session(&self, id: &str) -> Result<Option<Session>>;
    async fn list_sessions(&self, opts: &ListOptions) -> Result<Vec<Session>>;
    async fn update_session(&self, session: &Session) -> Result<()>;
    async fn delete_session(&self, id: &str) -> Result<()>;

    // -- execution state --
    async fn save_execution_state(&self, state: &ExecutionState) -> Result<()>;
    async fn get_execution_state(&self, session_id: &str) -> Result<Option<ExecutionState>>;
    async fn update_node_state(&self, session_id: &str, node_state: &NodeState) -> Result<()>;

    // -- LLM executions --
    async fn save_llm_execution(&self, record: &LlmExecutionRecord) -> Result<()>;
    async fn get_llm_executions_by_session(&self, session_id: &str) -> Result<Vec<LlmExecutionRecord>>;
    async fn get_llm_executions_by_node(
        &self,
        session_id: &str,
        node_id: &str,
    ) -> Result<Vec<LlmExecutionRecord>>;

    // -- budget pools --
    async fn create_budget_pool(&self, pool: &BudgetPool) -> Result<()>;
    async fn get_budget_pool(&self, id: &str) -> Result<Option<BudgetPool>>;
    async fn update_budget_pool(&self, pool: &BudgetPool) -> Result<()>;
    async fn get_budget_pool_children(&self, parent_id: &str) -> Result<Vec<BudgetPool>>;

    // -- tool calls --
    async fn log_tool_call(&self, log: &ToolCallLog) -> Result<()>;
    async fn get_tool_calls_by_execution(&self, execution_id: &str) -> Result<Vec<ToolCallLog>>;
    async fn get_tool_calls_by_session(&self, session_id: &str) -> Result<Vec<ToolCallLog>>;

    // -- approvals --
    async fn create_approval(&self, approval: &ApprovalRequest) -> Result<()>;
    async fn get_approval(&self, id: &str) -> Result<Option<ApprovalRequest>>;
    async fn list_approvals_by_session(&self, session_id: &str) -> Result<Vec<ApprovalRequest>>;
    async fn list_pending_approvals(&self) -> Result<Vec<ApprovalRequest>>;
    async fn update_approval(&self, approval: &ApprovalRequest) -> Result<()>;

    async fn approve(
        &self,
        id: &str,
        approved_by: &str,
        notes: Option<String>,
    ) -> Result<ApprovalRequest> {
        let mut approval = self
            .get_approval(id)
            .await?
            .ok_or_else(|| crate::error::WorkflowError::ApprovalNotFound(id.to_string()))?;
        approval.approve(approved_by, notes);
        self.update_approval(&approval).await?;
        Ok(approval)
    }

    async fn reject(
        &self,
        id: &str,
        rejected_by: &str,
        notes: Option<String>,
    ) -> Result<ApprovalRequest> {
        let mut approval = self
            .get_approval(id)
            .await?
            .ok_or_else(|| crate::error::WorkflowError::ApprovalNotFound(id.to_string()))?;
        approval.reject(rejected_by, notes);
        self.update_approval(&approval).await?;
        Ok(approval)
    }
}

/// True if exactly one approval in `session_id` is pending (testable property #4).
pub async fn has_exactly_one_pending_approval(
    store: &dyn Store,
    session_id: &str,
) -> Result<bool> {
    let approvals = store.list_approvals_by_session(session_id).await?;
    let pending = approvals
        .iter()
        .filter(|a| a.status == ApprovalStatus::Pending)
        .count();
    Ok(pending == 1)
}
