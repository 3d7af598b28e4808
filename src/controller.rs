//! Run controller and approval protocol (§4.6)

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::budget::BudgetManager;
use crate::error::{Result, WorkflowError};
use crate::events::{EventLog, ExecutionEvent};
use crate::executor::{ExecutionContext, GraphExecutor, NestedRunner};
use crate::llm::LlmExecutor;
use crate::model::{ApprovalStatus, ExecutionState, Session, SessionStatus};
use crate::store::Store;

/// Optional knobs for starting a run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub session_id: Option<String>,
    pub budget_pool_id: Option<String>,
}

/// The result of starting or resuming a run: either it ran to completion,
/// or it hit an approval gate and is now paused.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed { session_id: String, output: Value },
    Suspended { session_id: String, approval_id: String },
}

/// Orchestrates session lifecycle: loads a workflow, drives the graph
/// executor over it, and persists the resulting session/execution-state
/// transitions.
pub struct RunController {
    store: Arc<dyn Store>,
    budget: Arc<BudgetManager>,
    llm: Arc<LlmExecutor>,
    event_log: Arc<EventLog>,
    graph: GraphExecutor,
}

impl RunController {
    pub fn new(store: Arc<dyn Store>, budget: Arc<BudgetManager>, llm: Arc<LlmExecutor>, event_log: Arc<EventLog>) -> Self {
        Self { store, budget, llm, event_log, graph: GraphExecutor::new() }
    }

    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.event_log
    }

    /// Start a run for `workflow_id` against `input` (§4.6 "Start a run").
    pub async fn start_run(&self, workflow_id: &str, input: Value, options: RunOptions) -> Result<RunOutcome> {
        let stored = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;

        let mut session = Session::new(workflow_id, stored.definition.clone());
        if let Some(id) = options.session_id {
            session.id = id;
        }
        self.store.create_session(&session).await?;
        self.event_log.push(ExecutionEvent::session_started(&session.id, workflow_id)).await;
        info!(session_id = %session.id, workflow_id, "session started");

        let execution_state = ExecutionState::new(session.id.clone(), options.budget_pool_id.clone());
        self.store.save_execution_state(&execution_state).await?;

        let ctx = ExecutionContext {
            store: self.store.clone(),
            budget: self.budget.clone(),
            llm: self.llm.clone(),
            event_log: self.event_log.clone(),
            session_id: session.id.clone(),
            budget_pool_id: options.budget_pool_id.clone(),
            runner: self,
            resuming_node_id: None,
        };

        let result = self.graph.execute_node(&ctx, "root", &stored.definition.root, input).await;
        self.finish_run(&session.id, result).await
    }

    /// Resume a suspended session once its gating approval has been
    /// approved (§4.6 "Resume").
    pub async fn resume(&self, session_id: &str, approval_id: &str) -> Result<RunOutcome> {
        let approval = self
            .store
            .get_approval(approval_id)
            .await?
            .ok_or_else(|| WorkflowError::ApprovalNotFound(approval_id.to_string()))?;

        if approval.status != ApprovalStatus::Approved {
            return Err(WorkflowError::NotApproved(approval_id.to_string()));
        }

        let mut session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| WorkflowError::SessionNotFound(session_id.to_string()))?;
        session.status = SessionStatus::Running;
        session.touch();
        self.store.update_session(&session).await?;
        self.event_log.push(ExecutionEvent::approval_resolved(approval_id, true)).await;

        let execution_state = self.store.get_execution_state(session_id).await?;
        let budget_pool_id = execution_state.as_ref().and_then(|es| es.budget_pool_id.clone());
        let resume_input = execution_state
            .as_ref()
            .and_then(|es| es.node_states.get("root"))
            .and_then(|s| s.input.clone())
            .unwrap_or(Value::Null);

        let ctx = ExecutionContext {
            store: self.store.clone(),
            budget: self.budget.clone(),
            llm: self.llm.clone(),
            event_log: self.event_log.clone(),
            session_id: session_id.to_string(),
            budget_pool_id,
            runner: self,
            resuming_node_id: Some(approval.node_id.clone()),
        };

        let result = self
            .graph
            .execute_node(&ctx, "root", &session.workflow_snapshot.root, resume_input)
            .await;
        self.finish_run(session_id, result).await
    }

    async fn finish_run(&self, session_id: &str, result: Result<Value>) -> Result<RunOutcome> {
        match result {
            Ok(output) => {
                self.mark_terminal(session_id, SessionStatus::Completed).await?;
                self.event_log.push(ExecutionEvent::session_completed(session_id)).await;
                info!(session_id, "session completed");
                Ok(RunOutcome::Completed { session_id: session_id.to_string(), output })
            }
            Err(WorkflowError::Suspended(approval_id)) => {
                if let Some(mut state) = self.store.get_execution_state(session_id).await? {
                    if let Some(approval) = self.store.get_approval(&approval_id).await? {
                        state.current_node_id = Some(approval.node_id);
                        if let Some(session) = self.store.get_session(session_id).await? {
                            state.status = session.status;
                        }
                        self.store.save_execution_state(&state).await?;
                    }
                }
                Ok(RunOutcome::Suspended { session_id: session_id.to_string(), approval_id })
            }
            Err(e) => {
                self.mark_terminal(session_id, SessionStatus::Failed).await?;
                self.event_log.push(ExecutionEvent::session_failed(session_id, e.to_string())).await;
                Err(e)
            }
        }
    }

    async fn mark_terminal(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        if let Some(mut session) = self.store.get_session(session_id).await? {
            session.status = status;
            session.touch();
            self.store.update_session(&session).await?;
        }
        if let Some(mut state) = self.store.get_execution_state(session_id).await? {
            state.status = status;
            state.completed_at = Some(chrono::Utc::now());
            self.store.save_execution_state(&state).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl NestedRunner for RunController {
    /// Run `workflow_ref` as a nested session, propagating a nested
    /// suspension as this call's own `Suspended` signal.
    async fn run_nested(&self, workflow_ref: &str, input: Value, budget_pool_id: Option<String>) -> Result<Value> {
        let outcome = Box::pin(self.start_run(workflow_ref, input, RunOptions { session_id: None, budget_pool_id })).await?;
        match outcome {
            RunOutcome::Completed { output, .. } => Ok(output),
            RunOutcome::Suspended { approval_id, .. } => Err(WorkflowError::Suspended(approval_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::EchoProvider;
    use crate::model::{Node, NodeMessageType, NodeVariant, StoredWorkflow, TransformExpr, WorkflowDefinition};
    use crate::store::sqlite::{Database, SqliteStore};
    use crate::tools::ToolBridge;
    use serde_json::json;
    use std::collections::HashMap;

    fn passthrough_workflow() -> WorkflowDefinition {
        let root = Node {
            variant: NodeVariant::Transform { fn_: TransformExpr::Get { path: None } },
            input_type: NodeMessageType::String,
            output_type: NodeMessageType::String,
        };
        WorkflowDefinition { root, typedefs: HashMap::new() }
    }

    fn reviewed_llm_workflow() -> WorkflowDefinition {
        let llm_node = Node {
            variant: NodeVariant::Llm {
                max_retries: 0,
                system_prompt: None,
                available_tools: None,
                reviewers: None,
                requires_human_review: true,
            },
            input_type: NodeMessageType::String,
            output_type: NodeMessageType::String,
        };
        let mut nodes = HashMap::new();
        nodes.insert("llm1".to_string(), llm_node);
        let edges = vec![
            crate::model::Edge { from: "entry".into(), to: "llm1".into(), previous_node_message_output_field_name: None, message_input_field_name: None, description: String::new() },
            crate::model::Edge { from: "llm1".into(), to: "exit".into(), previous_node_message_output_field_name: None, message_input_field_name: None, description: String::new() },
        ];
        let root = Node {
            variant: NodeVariant::Group {
                label: "root".to_string(),
                nodes,
                edges,
                entry_point: "entry".to_string(),
                exit_point: "exit".to_string(),
                context: None,
            },
            input_type: NodeMessageType::String,
            output_type: NodeMessageType::String,
        };
        WorkflowDefinition { root, typedefs: HashMap::new() }
    }

    async fn make_controller() -> (RunController, Arc<dyn Store>) {
        make_controller_with_provider(Arc::new(EchoProvider::default())).await
    }

    /// Records how many times `generate_text` was called, to prove the
    /// human-review gate suspends before the provider is ever invoked.
    struct CountingProvider {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl crate::llm::LlmProvider for CountingProvider {
        async fn generate_text(&self, request: crate::llm::GenerateRequest) -> Result<crate::llm::GenerateResponse> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(crate::llm::GenerateResponse { text: Some(request.prompt), tool_calls: Vec::new(), usage: None })
        }
    }

    #[tokio::test]
    async fn human_review_suspends_before_provider_is_ever_called() {
        let provider = Arc::new(CountingProvider { calls: std::sync::atomic::AtomicUsize::new(0) });
        let (controller, store) = make_controller_with_provider(provider.clone()).await;
        let workflow = StoredWorkflow::new("reviewed", reviewed_llm_workflow());
        store.save_workflow(&workflow).await.unwrap();

        let outcome = controller.start_run(&workflow.id, json!("draft text"), RunOptions::default()).await.unwrap();
        let (session_id, approval_id) = match outcome {
            RunOutcome::Suspended { session_id, approval_id } => (session_id, approval_id),
            _ => panic!("expected suspension"),
        };
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        let approval = store.get_approval(&approval_id).await.unwrap().unwrap();
        match approval.context {
            crate::model::ApprovalContext::HumanReview { llm_output } => {
                assert_eq!(llm_output, json!("draft text"));
            }
            _ => panic!("expected human review context"),
        }

        store.approve(&approval_id, "reviewer@example.com", None).await.unwrap();
        controller.resume(&session_id, &approval_id).await.unwrap();
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    async fn make_controller_with_provider(provider: Arc<dyn crate::llm::LlmProvider>) -> (RunController, Arc<dyn Store>) {
        let db = Database::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(db));
        let budget = Arc::new(BudgetManager::new(store.clone()));
        let bridge = Arc::new(ToolBridge::new(store.clone(), vec![]));
        let llm = Arc::new(LlmExecutor::new(provider, store.clone(), bridge));
        let event_log = Arc::new(EventLog::new());
        (RunController::new(store.clone(), budget, llm, event_log), store)
    }

    #[tokio::test]
    async fn start_run_completes_simple_workflow() {
        let (controller, store) = make_controller().await;
        let workflow = StoredWorkflow::new("passthrough", passthrough_workflow());
        store.save_workflow(&workflow).await.unwrap();

        let outcome = controller
            .start_run(&workflow.id, json!("hi"), RunOptions::default())
            .await
            .unwrap();

        match outcome {
            RunOutcome::Completed { output, .. } => assert_eq!(output, json!("hi")),
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn start_run_missing_workflow_fails() {
        let (controller, _store) = make_controller().await;
        let err = controller.start_run("nope", json!(null), RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::WorkflowNotFound(_)));
    }

    #[tokio::test]
    async fn human_review_suspends_then_resumes_after_approval() {
        let (controller, store) = make_controller().await;
        let workflow = StoredWorkflow::new("reviewed", reviewed_llm_workflow());
        store.save_workflow(&workflow).await.unwrap();

        let outcome = controller
            .start_run(&workflow.id, json!("draft text"), RunOptions::default())
            .await
            .unwrap();

        let (session_id, approval_id) = match outcome {
            RunOutcome::Suspended { session_id, approval_id } => (session_id, approval_id),
            _ => panic!("expected suspension"),
        };

        let session = store.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(session.status, crate::model::SessionStatus::WaitingForHumanReview);

        store.approve(&approval_id, "reviewer@example.com", None).await.unwrap();

        let resumed = controller.resume(&session_id, &approval_id).await.unwrap();
        match resumed {
            RunOutcome::Completed { output, .. } => assert_eq!(output, json!("draft text")),
            _ => panic!("expected completion after resume"),
        }

        let session = store.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(session.status, crate::model::SessionStatus::Completed);
    }

    /// Scenario E: outer workflow calls inner workflow via `CallWorkflow`
    /// with input/output mapping; `{ payload: 42 }` in, `{ wrapped: 42 }` out.
    #[tokio::test]
    async fn call_workflow_maps_input_and_output() {
        let (controller, store) = make_controller().await;

        let inner = StoredWorkflow::new("inner-echo", passthrough_workflow());
        store.save_workflow(&inner).await.unwrap();

        let mut output_fields = HashMap::new();
        output_fields.insert("wrapped".to_string(), Box::new(TransformExpr::Get { path: None }));
        let outer_root = Node {
            variant: NodeVariant::CallWorkflow {
                workflow_ref: inner.id.clone(),
                input_mapping: Some(TransformExpr::Get { path: Some(vec!["payload".to_string()]) }),
                output_mapping: Some(TransformExpr::Object { fields: output_fields }),
                requires_approval: false,
            },
            input_type: NodeMessageType::Object { fields: HashMap::new() },
            output_type: NodeMessageType::Object { fields: HashMap::new() },
        };
        let outer = StoredWorkflow::new("outer-caller", WorkflowDefinition { root: outer_root, typedefs: HashMap::new() });
        store.save_workflow(&outer).await.unwrap();

        let outcome = controller
            .start_run(&outer.id, json!({"payload": 42}), RunOptions::default())
            .await
            .unwrap();

        match outcome {
            RunOutcome::Completed { output, .. } => assert_eq!(output, json!({"wrapped": 42})),
            _ => panic!("expected completion"),
        }
    }

    /// Scenario F: save workflow, create a budget pool, run an LLM node that
    /// requires human review and reports usage, approve it, and confirm the
    /// pool is debited and the session completes.
    #[tokio::test]
    async fn composite_lifecycle_budget_review_and_completion() {
        let usage = crate::model::Usage { prompt_tokens: 50, completion_tokens: 25, total_tokens: 75 };
        let provider = Arc::new(EchoProvider { usage });
        let (controller, store) = make_controller_with_provider(provider).await;

        let pool = crate::model::BudgetPool::new("pool-p", 1000, None);
        store.create_budget_pool(&pool).await.unwrap();

        let workflow = StoredWorkflow::new("reviewed-with-budget", reviewed_llm_workflow());
        store.save_workflow(&workflow).await.unwrap();

        let options = RunOptions { session_id: None, budget_pool_id: Some(pool.id.clone()) };
        let outcome = controller.start_run(&workflow.id, json!("draft text"), options).await.unwrap();
        let (session_id, approval_id) = match outcome {
            RunOutcome::Suspended { session_id, approval_id } => (session_id, approval_id),
            _ => panic!("expected suspension for human review"),
        };

        let approval = store.get_approval(&approval_id).await.unwrap().unwrap();
        assert_eq!(approval.type_, crate::model::ApprovalType::HumanReview);

        store.approve(&approval_id, "reviewer@example.com", None).await.unwrap();
        let resumed = controller.resume(&session_id, &approval_id).await.unwrap();
        match resumed {
            RunOutcome::Completed { output, .. } => assert_eq!(output, json!("draft text")),
            _ => panic!("expected completion after resume"),
        }

        let session = store.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(session.status, crate::model::SessionStatus::Completed);

        let pool_after = store.get_budget_pool(&pool.id).await.unwrap().unwrap();
        assert_eq!(pool_after.used_budget, 75);
        assert_eq!(pool_after.remaining_budget, 925);
        assert!(pool_after.is_balanced());
    }
}
