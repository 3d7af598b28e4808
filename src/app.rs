//! Public library surface (§6): an application handle assembling the store,
//! budget manager, LLM executor, and run controller behind `initialize`/
//! `close`, mirroring this codebase's `Database::initialize`/`Database::close`
//! pairing.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::budget::BudgetManager;
use crate::config::RuntimeConfig;
use crate::controller::{RunController, RunOptions, RunOutcome};
use crate::error::Result;
use crate::events::EventLog;
use crate::llm::{EchoProvider, LlmExecutor, LlmProvider};
use crate::model::{ApprovalRequest, StoredWorkflow};
use crate::store::sqlite::{Database, SqliteStore};
use crate::store::{ListOptions, Store};
use crate::tools::{Tool, ToolBridge};

/// Construction-time knobs for [`Application::initialize`]. The LLM provider
/// and tool set are supplied by the caller; this crate ships no concrete
/// network transport.
pub struct ApplicationOptions {
    pub config_path: Option<PathBuf>,
    pub provider: Arc<dyn LlmProvider>,
    pub tools: Vec<Arc<dyn Tool>>,
}

impl Default for ApplicationOptions {
    fn default() -> Self {
        Self { config_path: None, provider: Arc::new(EchoProvider::default()), tools: Vec::new() }
    }
}

/// The assembled runtime: store, budget manager, LLM executor, and run
/// controller behind one handle. This is the crate's intended entry point.
pub struct Application {
    config: RuntimeConfig,
    store: Arc<dyn Store>,
    db: Database,
    controller: RunController,
}

impl Application {
    /// Load configuration, connect the store, run migrations, and assemble
    /// the controller. Mirrors this codebase's `Database::initialize`.
    pub async fn initialize(options: ApplicationOptions) -> Result<Self> {
        let config = RuntimeConfig::load(options.config_path.as_deref())?;

        let db = if config.database.path == ":memory:" {
            Database::in_memory().await?
        } else {
            Database::connect(&config.database.path).await?
        };
        db.run_migrations().await?;

        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(db.clone()));
        let budget = Arc::new(BudgetManager::new(store.clone()));
        let tool_bridge = Arc::new(ToolBridge::new(store.clone(), options.tools));
        let llm = Arc::new(LlmExecutor::new(options.provider, store.clone(), tool_bridge));
        let event_log = Arc::new(EventLog::new());
        let controller = RunController::new(store.clone(), budget, llm, event_log);

        Ok(Self { config, store, db, controller })
    }

    /// Close the underlying store connection. Mirrors this codebase's
    /// `Database::close`.
    pub async fn close(&self) -> Result<()> {
        self.db.close().await;
        Ok(())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn event_log(&self) -> &Arc<EventLog> {
        self.controller.event_log()
    }

    pub async fn save_workflow(&self, workflow: &StoredWorkflow) -> Result<()> {
        self.store.save_workflow(workflow).await
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Option<StoredWorkflow>> {
        self.store.get_workflow(id).await
    }

    pub async fn list_workflows(&self, opts: &ListOptions) -> Result<Vec<StoredWorkflow>> {
        self.store.list_workflows(opts).await
    }

    /// Start a new run of `workflow_id` against `input`.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        input: Value,
        options: Option<RunOptions>,
    ) -> Result<RunOutcome> {
        self.controller.start_run(workflow_id, input, options.unwrap_or_default()).await
    }

    /// Resume a suspended session once its gating approval has been decided.
    pub async fn resume(&self, session_id: &str, approval_id: &str) -> Result<RunOutcome> {
        self.controller.resume(session_id, approval_id).await
    }

    pub async fn get_approval_request(&self, id: &str) -> Result<Option<ApprovalRequest>> {
        self.store.get_approval(id).await
    }

    pub async fn approve_request(
        &self,
        id: &str,
        approved_by: &str,
        notes: Option<String>,
    ) -> Result<ApprovalRequest> {
        self.store.approve(id, approved_by, notes).await
    }

    pub async fn reject_request(
        &self,
        id: &str,
        rejected_by: &str,
        reason: Option<String>,
    ) -> Result<ApprovalRequest> {
        self.store.reject(id, rejected_by, reason).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Node, NodeMessageType, NodeVariant, TransformExpr, WorkflowDefinition};
    use serde_json::json;
    use std::collections::HashMap;

    async fn test_app() -> Application {
        let mut options = ApplicationOptions::default();
        options.config_path = None;
        // force in-memory store regardless of default config path
        let config = RuntimeConfig { database: crate::config::DatabaseConfig { path: ":memory:".to_string() }, ..RuntimeConfig::defaults() };
        let db = Database::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(db.clone()));
        let budget = Arc::new(BudgetManager::new(store.clone()));
        let tool_bridge = Arc::new(ToolBridge::new(store.clone(), options.tools));
        let llm = Arc::new(LlmExecutor::new(options.provider, store.clone(), tool_bridge));
        let event_log = Arc::new(EventLog::new());
        let controller = RunController::new(store.clone(), budget, llm, event_log);
        Application { config, store, db, controller }
    }

    fn passthrough_workflow() -> WorkflowDefinition {
        let root = Node {
            variant: NodeVariant::Transform { fn_: TransformExpr::Get { path: None } },
            input_type: NodeMessageType::String,
            output_type: NodeMessageType::String,
        };
        WorkflowDefinition { root, typedefs: HashMap::new() }
    }

    #[tokio::test]
    async fn save_and_execute_round_trip() {
        let app = test_app().await;
        let workflow = StoredWorkflow::new("passthrough", passthrough_workflow());
        app.save_workflow(&workflow).await.unwrap();

        let fetched = app.get_workflow(&workflow.id).await.unwrap().unwrap();
        assert_eq!(fetched.definition, workflow.definition);

        let outcome = app.execute_workflow(&workflow.id, json!("hi"), None).await.unwrap();
        match outcome {
            RunOutcome::Completed { output, .. } => assert_eq!(output, json!("hi")),
            _ => panic!("expected completion"),
        }

        app.close().await.unwrap();
    }
}
