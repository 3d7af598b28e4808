//! SQLite reference implementation of the [`Store`] contract
//!
//! Mirrors this codebase's usual shape: a pooled `Database` handle plus a
//! single store struct that owns it, with JSON-serialized columns for every
//! tree-shaped field (`definition`, `workflow_snapshot`, node `input`/`output`,
//! approval `context`, all `metadata`).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use super::{ListOptions, Store, Transaction};
use crate::error::{Result, WorkflowError};
use crate::model::*;

/// Pooled SQLite connection, analogous to this codebase's `Database` wrapper.
#[derive(Clone)]
pub struct Database {
    pool: Arc<SqlitePool>,
}

impl Database {
    /// Connect to `database_path`, creating its parent directory if needed.
    pub async fn connect<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let path = database_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let path_str = path
            .to_str()
            .ok_or_else(|| WorkflowError::Config("invalid database path".to_string()))?;
        let url = format!("sqlite:{}?mode=rwc", path_str);
        debug!(url = %url, "connecting to workflow store");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        info!(path = %path.display(), "workflow store connection established");
        Ok(Self { pool: Arc::new(pool) })
    }

    /// An in-memory database, useful for tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(|e| WorkflowError::Config(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the underlying connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("workflow store connection closed");
    }
}

fn to_ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}

fn to_json(value: &impl serde::Serialize) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    Ok(serde_json::from_str(raw)?)
}

/// `sqlx`-backed implementation of [`Store`].
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

struct SqliteTransaction(sqlx::Transaction<'static, sqlx::Sqlite>);

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.0.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.0.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn save_workflow(&self, workflow: &StoredWorkflow) -> Result<()> {
        let definition = to_json(&workflow.definition)?;
        let metadata = workflow.metadata.as_ref().map(to_json).transpose()?;
        sqlx::query(
            "INSERT INTO workflows (id, name, version, definition, created_at, updated_at, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(workflow.version)
        .bind(definition)
        .bind(to_ts(workflow.created_at))
        .bind(to_ts(workflow.updated_at))
        .bind(metadata)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<StoredWorkflow>> {
        let row = sqlx::query(
            "SELECT id, name, version, definition, created_at, updated_at, metadata
             FROM workflows WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(row_to_workflow).transpose()
    }

    async fn list_workflows(&self, opts: &ListOptions) -> Result<Vec<StoredWorkflow>> {
        let limit = opts.limit.unwrap_or(100);
        let offset = opts.offset.unwrap_or(0);
        let rows = sqlx::query(
            "SELECT id, name, version, definition, created_at, updated_at, metadata
             FROM workflows ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(row_to_workflow).collect()
    }

    async fn update_workflow(&self, workflow: &StoredWorkflow) -> Result<()> {
        let definition = to_json(&workflow.definition)?;
        let metadata = workflow.metadata.as_ref().map(to_json).transpose()?;
        sqlx::query(
            "UPDATE workflows SET name = ?, version = ?, definition = ?, updated_at = ?, metadata = ?
             WHERE id = ?",
        )
        .bind(&workflow.name)
        .bind(workflow.version)
        .bind(definition)
        .bind(to_ts(Utc::now()))
        .bind(metadata)
        .bind(&workflow.id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn delete_workflow(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn create_session(&self, session: &Session) -> Result<()> {
        let snapshot = to_json(&session.workflow_snapshot)?;
        let metadata = session.metadata.as_ref().map(to_json).transpose()?;
        sqlx::query(
            "INSERT INTO sessions (id, workflow_id, workflow_snapshot, status, created_at, updated_at, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.workflow_id)
        .bind(snapshot)
        .bind(session.status.as_str())
        .bind(to_ts(session.created_at))
        .bind(to_ts(session.updated_at))
        .bind(metadata)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            "SELECT id, workflow_id, workflow_snapshot, status, created_at, updated_at, metadata
             FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(row_to_session).transpose()
    }

    async fn list_sessions(&self, opts: &ListOptions) -> Result<Vec<Session>> {
        let limit = opts.limit.unwrap_or(100);
        let offset = opts.offset.unwrap_or(0);
        let rows = sqlx::query(
            "SELECT id, workflow_id, workflow_snapshot, status, created_at, updated_at, metadata
             FROM sessions ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(row_to_session).collect()
    }

    async fn update_session(&self, session: &Session) -> Result<()> {
        let metadata = session.metadata.as_ref().map(to_json).transpose()?;
        sqlx::query(
            "UPDATE sessions SET status = ?, updated_at = ?, metadata = ? WHERE id = ?",
        )
        .bind(session.status.as_str())
        .bind(to_ts(Utc::now()))
        .bind(metadata)
        .bind(&session.id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;
        sqlx::query("DELETE FROM approval_requests WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "DELETE FROM tool_call_logs WHERE execution_id IN
             (SELECT id FROM llm_executions WHERE session_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM llm_executions WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM node_states WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM execution_states WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save_execution_state(&self, state: &ExecutionState) -> Result<()> {
        let metadata = state.metadata.as_ref().map(to_json).transpose()?;
        sqlx::query(
            "INSERT INTO execution_states
                (session_id, budget_pool_id, started_at, completed_at, current_node_id, status, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                budget_pool_id = excluded.budget_pool_id,
                completed_at = excluded.completed_at,
                current_node_id = excluded.current_node_id,
                status = excluded.status,
                metadata = excluded.metadata",
        )
        .bind(&state.session_id)
        .bind(&state.budget_pool_id)
        .bind(to_ts(state.started_at))
        .bind(state.completed_at.map(to_ts))
        .bind(&state.current_node_id)
        .bind(state.status.as_str())
        .bind(metadata)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn get_execution_state(&self, session_id: &str) -> Result<Option<ExecutionState>> {
        let row = sqlx::query(
            "SELECT session_id, budget_pool_id, started_at, completed_at, current_node_id, status, metadata
             FROM execution_states WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else { return Ok(None) };
        let metadata: Option<String> = row.try_get("metadata")?;
        let mut state = ExecutionState {
            session_id: row.try_get("session_id")?,
            budget_pool_id: row.try_get("budget_pool_id")?,
            started_at: from_ts(row.try_get("started_at")?),
            completed_at: row.try_get::<Option<i64>, _>("completed_at")?.map(from_ts),
            current_node_id: row.try_get("current_node_id")?,
            status: SessionStatus::from(row.try_get::<String, _>("status")?.as_str()),
            node_states: Default::default(),
            metadata: metadata.map(|m| from_json(&m)).transpose()?,
        };

        let node_rows = sqlx::query(
            "SELECT node_id, status, input, output, error, started_at, completed_at,
                    retry_count, pending_approval_id, metadata
             FROM node_states WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_all(self.db.pool())
        .await?;

        for node_row in node_rows {
            let node_state = row_to_node_state(node_row)?;
            state.node_states.insert(node_state.node_id.clone(), node_state);
        }

        Ok(Some(state))
    }

    async fn update_node_state(&self, session_id: &str, node_state: &NodeState) -> Result<()> {
        let input = node_state.input.as_ref().map(to_json).transpose()?;
        let output = node_state.output.as_ref().map(to_json).transpose()?;
        let metadata = node_state.metadata.as_ref().map(to_json).transpose()?;
        sqlx::query(
            "INSERT INTO node_states
                (session_id, node_id, status, input, output, error, started_at, completed_at,
                 retry_count, pending_approval_id, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id, node_id) DO UPDATE SET
                status = excluded.status,
                input = excluded.input,
                output = excluded.output,
                error = excluded.error,
                completed_at = excluded.completed_at,
                retry_count = excluded.retry_count,
                pending_approval_id = excluded.pending_approval_id,
                metadata = excluded.metadata",
        )
        .bind(session_id)
        .bind(&node_state.node_id)
        .bind(node_state.status.as_str())
        .bind(input)
        .bind(output)
        .bind(&node_state.error)
        .bind(node_state.started_at.map(to_ts))
        .bind(node_state.completed_at.map(to_ts))
        .bind(node_state.retry_count)
        .bind(&node_state.pending_approval_id)
        .bind(metadata)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn save_llm_execution(&self, record: &LlmExecutionRecord) -> Result<()> {
        let tool_calls = record.tool_calls.as_ref().map(to_json).transpose()?;
        let usage = record.usage.as_ref().map(to_json).transpose()?;
        let metadata = record.metadata.as_ref().map(to_json).transpose()?;
        sqlx::query(
            "INSERT INTO llm_executions
                (id, session_id, node_id, timestamp, success, text, tool_calls, usage, error, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.session_id)
        .bind(&record.node_id)
        .bind(to_ts(record.timestamp))
        .bind(record.success)
        .bind(&record.text)
        .bind(tool_calls)
        .bind(usage)
        .bind(&record.error)
        .bind(metadata)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn get_llm_executions_by_session(&self, session_id: &str) -> Result<Vec<LlmExecutionRecord>> {
        let rows = sqlx::query(
            "SELECT id, session_id, node_id, timestamp, success, text, tool_calls, usage, error, metadata
             FROM llm_executions WHERE session_id = ? ORDER BY timestamp ASC",
        )
        .bind(session_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_llm_execution).collect()
    }

    async fn get_llm_executions_by_node(
        &self,
        session_id: &str,
        node_id: &str,
    ) -> Result<Vec<LlmExecutionRecord>> {
        let rows = sqlx::query(
            "SELECT id, session_id, node_id, timestamp, success, text, tool_calls, usage, error, metadata
             FROM llm_executions WHERE session_id = ? AND node_id = ? ORDER BY timestamp ASC",
        )
        .bind(session_id)
        .bind(node_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_llm_execution).collect()
    }

    async fn create_budget_pool(&self, pool: &BudgetPool) -> Result<()> {
        let metadata = pool.metadata.as_ref().map(to_json).transpose()?;
        sqlx::query(
            "INSERT INTO budget_pools
                (id, parent_pool_id, total_budget, used_budget, remaining_budget, status, created_at, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&pool.id)
        .bind(&pool.parent_pool_id)
        .bind(pool.total_budget)
        .bind(pool.used_budget)
        .bind(pool.remaining_budget)
        .bind(pool.status.as_str())
        .bind(to_ts(pool.created_at))
        .bind(metadata)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn get_budget_pool(&self, id: &str) -> Result<Option<BudgetPool>> {
        let row = sqlx::query(
            "SELECT id, parent_pool_id, total_budget, used_budget, remaining_budget, status, created_at, metadata
             FROM budget_pools WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;
        row.map(row_to_budget_pool).transpose()
    }

    async fn update_budget_pool(&self, pool: &BudgetPool) -> Result<()> {
        let metadata = pool.metadata.as_ref().map(to_json).transpose()?;
        sqlx::query(
            "UPDATE budget_pools SET total_budget = ?, used_budget = ?, remaining_budget = ?, status = ?, metadata = ?
             WHERE id = ?",
        )
        .bind(pool.total_budget)
        .bind(pool.used_budget)
        .bind(pool.remaining_budget)
        .bind(pool.status.as_str())
        .bind(metadata)
        .bind(&pool.id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn get_budget_pool_children(&self, parent_id: &str) -> Result<Vec<BudgetPool>> {
        let rows = sqlx::query(
            "SELECT id, parent_pool_id, total_budget, used_budget, remaining_budget, status, created_at, metadata
             FROM budget_pools WHERE parent_pool_id = ?",
        )
        .bind(parent_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_budget_pool).collect()
    }

    async fn log_tool_call(&self, log: &ToolCallLog) -> Result<()> {
        let args = to_json(&log.args)?;
        let result = log.result.as_ref().map(to_json).transpose()?;
        sqlx::query(
            "INSERT INTO tool_call_logs
                (id, execution_id, tool_call_id, tool_name, args, result, error, timestamp, duration_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&log.id)
        .bind(&log.execution_id)
        .bind(&log.tool_call_id)
        .bind(&log.tool_name)
        .bind(args)
        .bind(result)
        .bind(&log.error)
        .bind(to_ts(log.timestamp))
        .bind(log.duration_ms.map(|d| d as i64))
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn get_tool_calls_by_execution(&self, execution_id: &str) -> Result<Vec<ToolCallLog>> {
        let rows = sqlx::query(
            "SELECT id, execution_id, tool_call_id, tool_name, args, result, error, timestamp, duration_ms
             FROM tool_call_logs WHERE execution_id = ? ORDER BY timestamp ASC",
        )
        .bind(execution_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_tool_call_log).collect()
    }

    async fn get_tool_calls_by_session(&self, session_id: &str) -> Result<Vec<ToolCallLog>> {
        let rows = sqlx::query(
            "SELECT t.id, t.execution_id, t.tool_call_id, t.tool_name, t.args, t.result, t.error,
                    t.timestamp, t.duration_ms
             FROM tool_call_logs t
             JOIN llm_executions e ON e.id = t.execution_id
             WHERE e.session_id = ? ORDER BY t.timestamp ASC",
        )
        .bind(session_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_tool_call_log).collect()
    }

    async fn create_approval(&self, approval: &ApprovalRequest) -> Result<()> {
        let context = to_json(&approval.context)?;
        sqlx::query(
            "INSERT INTO approval_requests
                (id, session_id, node_id, type, status, context, created_at, resolved_at, resolved_by, resolution_notes)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&approval.id)
        .bind(&approval.session_id)
        .bind(&approval.node_id)
        .bind(approval.type_.as_str())
        .bind(approval.status.as_str())
        .bind(context)
        .bind(to_ts(approval.created_at))
        .bind(approval.resolved_at.map(to_ts))
        .bind(&approval.resolved_by)
        .bind(&approval.resolution_notes)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn get_approval(&self, id: &str) -> Result<Option<ApprovalRequest>> {
        let row = sqlx::query(
            "SELECT id, session_id, node_id, type, status, context, created_at, resolved_at, resolved_by, resolution_notes
             FROM approval_requests WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;
        row.map(row_to_approval).transpose()
    }

    async fn list_approvals_by_session(&self, session_id: &str) -> Result<Vec<ApprovalRequest>> {
        let rows = sqlx::query(
            "SELECT id, session_id, node_id, type, status, context, created_at, resolved_at, resolved_by, resolution_notes
             FROM approval_requests WHERE session_id = ? ORDER BY created_at ASC",
        )
        .bind(session_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_approval).collect()
    }

    async fn list_pending_approvals(&self) -> Result<Vec<ApprovalRequest>> {
        let rows = sqlx::query(
            "SELECT id, session_id, node_id, type, status, context, created_at, resolved_at, resolved_by, resolution_notes
             FROM approval_requests WHERE status = 'pending' ORDER BY created_at ASC",
        )
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_approval).collect()
    }

    async fn update_approval(&self, approval: &ApprovalRequest) -> Result<()> {
        sqlx::query(
            "UPDATE approval_requests SET status = ?, resolved_at = ?, resolved_by = ?, resolution_notes = ?
             WHERE id = ?",
        )
        .bind(approval.status.as_str())
        .bind(approval.resolved_at.map(to_ts))
        .bind(&approval.resolved_by)
        .bind(&approval.resolution_notes)
        .bind(&approval.id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }
}

impl SqliteStore {
    /// Begin a raw transaction for callers that need atomicity spanning
    /// several of the methods above (e.g. suspension writes, §5).
    pub async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.db.pool().clone().begin().await?;
        Ok(Box::new(SqliteTransaction(tx)))
    }
}

fn row_to_workflow(row: sqlx::sqlite::SqliteRow) -> Result<StoredWorkflow> {
    let definition: String = row.try_get("definition")?;
    let metadata: Option<String> = row.try_get("metadata")?;
    Ok(StoredWorkflow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        version: row.try_get::<i64, _>("version")? as u32,
        definition: from_json(&definition)?,
        created_at: from_ts(row.try_get("created_at")?),
        updated_at: from_ts(row.try_get("updated_at")?),
        metadata: metadata.map(|m| from_json(&m)).transpose()?,
    })
}

fn row_to_session(row: sqlx::sqlite::SqliteRow) -> Result<Session> {
    let snapshot: String = row.try_get("workflow_snapshot")?;
    let metadata: Option<String> = row.try_get("metadata")?;
    Ok(Session {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        workflow_snapshot: from_json(&snapshot)?,
        status: SessionStatus::from(row.try_get::<String, _>("status")?.as_str()),
        created_at: from_ts(row.try_get("created_at")?),
        updated_at: from_ts(row.try_get("updated_at")?),
        metadata: metadata.map(|m| from_json(&m)).transpose()?,
    })
}

fn row_to_node_state(row: sqlx::sqlite::SqliteRow) -> Result<NodeState> {
    let input: Option<String> = row.try_get("input")?;
    let output: Option<String> = row.try_get("output")?;
    let metadata: Option<String> = row.try_get("metadata")?;
    Ok(NodeState {
        node_id: row.try_get("node_id")?,
        status: node_status_from_str(&row.try_get::<String, _>("status")?),
        input: input.map(|v| from_json(&v)).transpose()?,
        output: output.map(|v| from_json(&v)).transpose()?,
        error: row.try_get("error")?,
        started_at: row.try_get::<Option<i64>, _>("started_at")?.map(from_ts),
        completed_at: row.try_get::<Option<i64>, _>("completed_at")?.map(from_ts),
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        pending_approval_id: row.try_get("pending_approval_id")?,
        metadata: metadata.map(|m| from_json(&m)).transpose()?,
    })
}

fn node_status_from_str(s: &str) -> NodeStatus {
    match s {
        "pending" => NodeStatus::Pending,
        "running" => NodeStatus::Running,
        "completed" => NodeStatus::Completed,
        "failed" => NodeStatus::Failed,
        "skipped" => NodeStatus::Skipped,
        "waiting_for_approval" => NodeStatus::WaitingForApproval,
        "waiting_for_review" => NodeStatus::WaitingForReview,
        _ => NodeStatus::Pending,
    }
}

fn row_to_llm_execution(row: sqlx::sqlite::SqliteRow) -> Result<LlmExecutionRecord> {
    let tool_calls: Option<String> = row.try_get("tool_calls")?;
    let usage: Option<String> = row.try_get("usage")?;
    let metadata: Option<String> = row.try_get("metadata")?;
    Ok(LlmExecutionRecord {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        node_id: row.try_get("node_id")?,
        timestamp: from_ts(row.try_get("timestamp")?),
        success: row.try_get("success")?,
        text: row.try_get("text")?,
        tool_calls: tool_calls.map(|v| from_json(&v)).transpose()?,
        usage: usage.map(|v| from_json(&v)).transpose()?,
        error: row.try_get("error")?,
        metadata: metadata.map(|m| from_json(&m)).transpose()?,
    })
}

fn row_to_budget_pool(row: sqlx::sqlite::SqliteRow) -> Result<BudgetPool> {
    let metadata: Option<String> = row.try_get("metadata")?;
    Ok(BudgetPool {
        id: row.try_get("id")?,
        parent_pool_id: row.try_get("parent_pool_id")?,
        total_budget: row.try_get("total_budget")?,
        used_budget: row.try_get("used_budget")?,
        remaining_budget: row.try_get("remaining_budget")?,
        status: BudgetPoolStatus::from(row.try_get::<String, _>("status")?.as_str()),
        created_at: from_ts(row.try_get("created_at")?),
        metadata: metadata.map(|m| from_json(&m)).transpose()?,
    })
}

fn row_to_tool_call_log(row: sqlx::sqlite::SqliteRow) -> Result<ToolCallLog> {
    let args: String = row.try_get("args")?;
    let result: Option<String> = row.try_get("result")?;
    Ok(ToolCallLog {
        id: row.try_get("id")?,
        execution_id: row.try_get("execution_id")?,
        tool_call_id: row.try_get("tool_call_id")?,
        tool_name: row.try_get("tool_name")?,
        args: from_json(&args)?,
        result: result.map(|v| from_json(&v)).transpose()?,
        error: row.try_get("error")?,
        timestamp: from_ts(row.try_get("timestamp")?),
        duration_ms: row.try_get::<Option<i64>, _>("duration_ms")?.map(|d| d as u64),
    })
}

fn row_to_approval(row: sqlx::sqlite::SqliteRow) -> Result<ApprovalRequest> {
    let context: String = row.try_get("context")?;
    Ok(ApprovalRequest {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        node_id: row.try_get("node_id")?,
        type_: approval_type_from_str(&row.try_get::<String, _>("type")?),
        status: ApprovalStatus::from(row.try_get::<String, _>("status")?.as_str()),
        context: from_json(&context)?,
        created_at: from_ts(row.try_get("created_at")?),
        resolved_at: row.try_get::<Option<i64>, _>("resolved_at")?.map(from_ts),
        resolved_by: row.try_get("resolved_by")?,
        resolution_notes: row.try_get("resolution_notes")?,
    })
}

fn approval_type_from_str(s: &str) -> ApprovalType {
    match s {
        "human_review" => ApprovalType::HumanReview,
        "budget_increase" => ApprovalType::BudgetIncrease,
        "workflow_call" => ApprovalType::WorkflowCall,
        _ => ApprovalType::HumanReview,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::transform::TransformExpr;
    use crate::model::{NodeMessageType, NodeVariant};

    async fn store() -> SqliteStore {
        let db = Database::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();
        SqliteStore::new(db)
    }

    fn echo_workflow(name: &str) -> StoredWorkflow {
        let root = Node {
            variant: NodeVariant::Transform { fn_: TransformExpr::Get { path: None } },
            input_type: NodeMessageType::String,
            output_type: NodeMessageType::String,
        };
        StoredWorkflow::new(name, WorkflowDefinition { root, typedefs: Default::default() })
    }

    #[tokio::test]
    async fn workflow_round_trips_with_structural_equality() {
        let store = store().await;
        let workflow = echo_workflow("echo");
        store.save_workflow(&workflow).await.unwrap();

        let fetched = store.get_workflow(&workflow.id).await.unwrap().unwrap();
        assert_eq!(fetched.definition, workflow.definition);
        assert_eq!(fetched.name, "echo");
        assert_eq!(fetched.version, 1);
    }

    #[tokio::test]
    async fn missing_workflow_returns_none() {
        let store = store().await;
        assert!(store.get_workflow("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_workflow_bumps_definition_and_keeps_id() {
        let store = store().await;
        let mut workflow = echo_workflow("echo");
        store.save_workflow(&workflow).await.unwrap();

        workflow.name = "echo-v2".to_string();
        workflow.version = 2;
        store.update_workflow(&workflow).await.unwrap();

        let fetched = store.get_workflow(&workflow.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "echo-v2");
        assert_eq!(fetched.version, 2);
    }

    #[tokio::test]
    async fn session_create_get_update_round_trip() {
        let store = store().await;
        let workflow = echo_workflow("echo");
        store.save_workflow(&workflow).await.unwrap();

        let mut session = Session::new(&workflow.id, workflow.definition.clone());
        store.create_session(&session).await.unwrap();

        let fetched = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, SessionStatus::Running);
        assert_eq!(fetched.workflow_snapshot, workflow.definition);

        session.status = SessionStatus::Completed;
        store.update_session(&session).await.unwrap();
        let fetched = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn node_state_upsert_is_keyed_by_session_and_node() {
        let store = store().await;
        let workflow = echo_workflow("echo");
        store.save_workflow(&workflow).await.unwrap();
        let session = Session::new(&workflow.id, workflow.definition.clone());
        store.create_session(&session).await.unwrap();

        let exec = ExecutionState::new(&session.id, None);
        store.save_execution_state(&exec).await.unwrap();

        let mut node_state = NodeState::new("root", serde_json::json!("Ada"));
        store.update_node_state(&session.id, &node_state).await.unwrap();
        node_state.mark_completed(serde_json::json!("Ada"));
        store.update_node_state(&session.id, &node_state).await.unwrap();

        let fetched = store.get_execution_state(&session.id).await.unwrap().unwrap();
        assert_eq!(fetched.node_states.len(), 1);
        let saved = fetched.node_states.get("root").unwrap();
        assert_eq!(saved.status, NodeStatus::Completed);
        assert_eq!(saved.output, Some(serde_json::json!("Ada")));
    }

    #[tokio::test]
    async fn budget_pool_round_trip_and_children_lookup() {
        let store = store().await;
        let parent = BudgetPool::new("parent", 100, None);
        store.create_budget_pool(&parent).await.unwrap();
        let child = BudgetPool::new("child", 50, Some("parent".to_string()));
        store.create_budget_pool(&child).await.unwrap();

        let children = store.get_budget_pool_children("parent").await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, "child");

        let mut fetched = store.get_budget_pool("child").await.unwrap().unwrap();
        fetched.used_budget = 30;
        fetched.remaining_budget = 20;
        store.update_budget_pool(&fetched).await.unwrap();
        let reloaded = store.get_budget_pool("child").await.unwrap().unwrap();
        assert_eq!(reloaded.remaining_budget, 20);
    }

    #[tokio::test]
    async fn update_budget_pool_persists_total_budget() {
        let store = store().await;
        let pool = BudgetPool::new("root", 100, None);
        store.create_budget_pool(&pool).await.unwrap();

        let mut increased = store.get_budget_pool("root").await.unwrap().unwrap();
        increased.total_budget += 50;
        increased.remaining_budget += 50;
        store.update_budget_pool(&increased).await.unwrap();

        let reloaded = store.get_budget_pool("root").await.unwrap().unwrap();
        assert_eq!(reloaded.total_budget, 150);
        assert!(reloaded.is_balanced());
    }

    #[tokio::test]
    async fn approval_round_trip_matches_resolved_by_and_notes() {
        let store = store().await;
        let workflow = echo_workflow("echo");
        store.save_workflow(&workflow).await.unwrap();
        let session = Session::new(&workflow.id, workflow.definition.clone());
        store.create_session(&session).await.unwrap();

        let approval = ApprovalRequest::new(
            &session.id,
            "root",
            ApprovalType::HumanReview,
            ApprovalContext::HumanReview { llm_output: serde_json::json!("x") },
        );
        store.create_approval(&approval).await.unwrap();

        let pending = store.list_pending_approvals().await.unwrap();
        assert_eq!(pending.len(), 1);

        let resolved = store.approve(&approval.id, "alice", Some("ok".to_string())).await.unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert_eq!(resolved.resolved_by.as_deref(), Some("alice"));

        let fetched = store.get_approval(&approval.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ApprovalStatus::Approved);
        assert_eq!(fetched.resolution_notes.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn delete_session_cascades_to_node_states_llm_executions_and_approvals() {
        let store = store().await;
        let workflow = echo_workflow("echo");
        store.save_workflow(&workflow).await.unwrap();
        let session = Session::new(&workflow.id, workflow.definition.clone());
        store.create_session(&session).await.unwrap();

        let exec_state = ExecutionState::new(&session.id, None);
        store.save_execution_state(&exec_state).await.unwrap();
        let node_state = NodeState::new("root", serde_json::json!("Ada"));
        store.update_node_state(&session.id, &node_state).await.unwrap();

        let record = LlmExecutionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session.id.clone(),
            node_id: "root".to_string(),
            timestamp: Utc::now(),
            success: true,
            text: Some("hi".to_string()),
            tool_calls: None,
            usage: None,
            error: None,
            metadata: None,
        };
        store.save_llm_execution(&record).await.unwrap();

        let tool_log = ToolCallLog {
            id: uuid::Uuid::new_v4().to_string(),
            execution_id: record.id.clone(),
            tool_call_id: "call-1".to_string(),
            tool_name: "lookup".to_string(),
            args: serde_json::json!({}),
            result: None,
            error: None,
            timestamp: Utc::now(),
            duration_ms: Some(5),
        };
        store.log_tool_call(&tool_log).await.unwrap();

        let approval = ApprovalRequest::new(
            &session.id,
            "root",
            ApprovalType::HumanReview,
            ApprovalContext::HumanReview { llm_output: serde_json::json!("x") },
        );
        store.create_approval(&approval).await.unwrap();

        store.delete_session(&session.id).await.unwrap();

        assert!(store.get_session(&session.id).await.unwrap().is_none());
        assert!(store.get_execution_state(&session.id).await.unwrap().is_none());
        assert!(store.get_llm_executions_by_session(&session.id).await.unwrap().is_empty());
        assert!(store.get_tool_calls_by_execution(&record.id).await.unwrap().is_empty());
        assert!(store.list_approvals_by_session(&session.id).await.unwrap().is_empty());
    }
}
