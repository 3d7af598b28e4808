//! Graph executor (§4.2): per-node dispatch, group traversal, edge
//! projection, and state persistence.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::budget::BudgetManager;
use crate::error::{Result, WorkflowError};
use crate::events::{EventLog, ExecutionEvent};
use crate::llm::{LlmExecuteParams, LlmExecutor};
use crate::model::{
    ApprovalContext, ApprovalRequest, ApprovalType, Edge, Node, NodeState, NodeStatus, NodeVariant,
    SessionStatus, ToolDeclaration,
};
use crate::store::Store;
use crate::transform;

/// Invokes a nested workflow run by reference; implemented by the run
/// controller so the executor never depends on it directly.
#[async_trait]
pub trait NestedRunner: Send + Sync {
    async fn run_nested(
        &self,
        workflow_ref: &str,
        input: Value,
        budget_pool_id: Option<String>,
    ) -> Result<Value>;
}

/// Per-run state threaded through every recursive `execute_node` call.
pub struct ExecutionContext<'a> {
    pub store: Arc<dyn Store>,
    pub budget: Arc<BudgetManager>,
    pub llm: Arc<LlmExecutor>,
    pub event_log: Arc<EventLog>,
    pub session_id: String,
    pub budget_pool_id: Option<String>,
    pub runner: &'a dyn NestedRunner,
    /// Set only during `resume`, to the qualified id of the node whose
    /// approval was just granted — lets that one node bypass the gate that
    /// suspended it without re-suspending on re-entry.
    pub resuming_node_id: Option<String>,
}

impl<'a> ExecutionContext<'a> {
    fn is_resuming(&self, qualified_id: &str) -> bool {
        self.resuming_node_id.as_deref() == Some(qualified_id)
    }
}

pub struct GraphExecutor;

impl Default for GraphExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute one node against one input, persisting state transitions
    /// around the dispatch (§4.2 "Per-node protocol").
    pub async fn execute_node(
        &self,
        ctx: &ExecutionContext<'_>,
        qualified_id: &str,
        node: &Node,
        input: Value,
    ) -> Result<Value> {
        if ctx.resuming_node_id.is_some() && !ctx.is_resuming(qualified_id) {
            // Memoized replay: a node already completed before the
            // suspension that triggered this resume is reused verbatim.
            if let Some(existing) = self.existing_node_state(ctx, qualified_id).await? {
                if existing.status == NodeStatus::Completed {
                    if let Some(output) = existing.output {
                        return Ok(output);
                    }
                }
            }
        }

        let mut state = NodeState::new(qualified_id, input.clone());
        ctx.store.update_node_state(&ctx.session_id, &state).await?;
        ctx.event_log.push(ExecutionEvent::node_started(&ctx.session_id, qualified_id)).await;
        debug!(session_id = %ctx.session_id, node_id = qualified_id, "node dispatch started");

        match Box::pin(self.dispatch(ctx, qualified_id, node, input)).await {
            Ok(output) => {
                state.mark_completed(output.clone());
                ctx.store.update_node_state(&ctx.session_id, &state).await?;
                ctx.event_log.push(ExecutionEvent::node_completed(&ctx.session_id, qualified_id)).await;
                Ok(output)
            }
            Err(e) if e.is_suspended() => Err(e),
            Err(e) => {
                state.mark_failed(e.to_string());
                ctx.store.update_node_state(&ctx.session_id, &state).await?;
                ctx.event_log
                    .push(ExecutionEvent::node_failed(&ctx.session_id, qualified_id, e.to_string()))
                    .await;
                warn!(session_id = %ctx.session_id, node_id = qualified_id, error = %e, "node failed");
                Err(e)
            }
        }
    }

    async fn existing_node_state(&self, ctx: &ExecutionContext<'_>, qualified_id: &str) -> Result<Option<NodeState>> {
        Ok(ctx
            .store
            .get_execution_state(&ctx.session_id)
            .await?
            .and_then(|es| es.node_states.get(qualified_id).cloned()))
    }

    async fn dispatch(
        &self,
        ctx: &ExecutionContext<'_>,
        qualified_id: &str,
        node: &Node,
        input: Value,
    ) -> Result<Value> {
        match &node.variant {
            NodeVariant::Group { nodes, edges, entry_point, exit_point, .. } => {
                self.execute_group(ctx, qualified_id, nodes, edges, entry_point, exit_point, input).await
            }
            NodeVariant::Llm {
                max_retries,
                system_prompt,
                available_tools,
                requires_human_review,
                ..
            } => {
                self.dispatch_llm(
                    ctx,
                    qualified_id,
                    *max_retries,
                    system_prompt.as_deref(),
                    available_tools.as_deref().unwrap_or(&[]),
                    *requires_human_review,
                    input,
                )
                .await
            }
            NodeVariant::Transform { fn_ } => transform::eval(fn_, &input, &[]),
            NodeVariant::CallWorkflow { workflow_ref, input_mapping, output_mapping, requires_approval } => {
                self.dispatch_call_workflow(
                    ctx,
                    qualified_id,
                    workflow_ref,
                    input_mapping.as_ref(),
                    output_mapping.as_ref(),
                    *requires_approval,
                    input,
                )
                .await
            }
            NodeVariant::Stream {} => Err(WorkflowError::Unimplemented("stream".to_string())),
            NodeVariant::Generator {} => Err(WorkflowError::Unimplemented("generator".to_string())),
        }
    }

    /// Walk a group from `entry_point` to `exit_point` (§4.2 "Group execution").
    #[allow(clippy::too_many_arguments)]
    async fn execute_group(
        &self,
        ctx: &ExecutionContext<'_>,
        qualifier: &str,
        nodes: &std::collections::HashMap<String, Node>,
        edges: &[Edge],
        entry_point: &str,
        exit_point: &str,
        input: Value,
    ) -> Result<Value> {
        let mut current_id = entry_point.to_string();
        let mut current_input = input;
        let mut visited: HashSet<String> = HashSet::new();

        loop {
            if visited.contains(&current_id) {
                return Err(WorkflowError::CycleDetected(current_id));
            }
            visited.insert(current_id.clone());

            let edge = match edges.iter().find(|e| e.from == current_id) {
                Some(e) => e,
                None => {
                    if current_id == exit_point {
                        return Ok(current_input);
                    }
                    return Err(WorkflowError::DanglingNode(current_id));
                }
            };

            let node_output = if let Some(node) = nodes.get(&current_id) {
                let qualified_id = format!("{}.{}", qualifier, current_id);
                Box::pin(self.execute_node(ctx, &qualified_id, node, current_input.clone())).await?
            } else {
                current_input.clone()
            };

            current_input = project_edge_output(edge, &node_output);
            current_id = edge.to.clone();

            if current_id == exit_point {
                return Ok(current_input);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_llm(
        &self,
        ctx: &ExecutionContext<'_>,
        qualified_id: &str,
        max_retries: u32,
        system_prompt: Option<&str>,
        available_tools: &[ToolDeclaration],
        requires_human_review: bool,
        input: Value,
    ) -> Result<Value> {
        let resuming_this_node = ctx.is_resuming(qualified_id);

        // Human review gates the provider call itself: on first entry the
        // node suspends on the raw input, before the provider is ever
        // invoked, so no cost or side effect is incurred ahead of approval.
        if requires_human_review && !resuming_this_node {
            return self.suspend_for_review(ctx, qualified_id, input).await;
        }

        // A prior recorded execution means this resume is replaying a node
        // that already called the provider before suspending (budget gate);
        // its absence means this is either a fresh call or a resume from a
        // human-review suspension that never reached the provider.
        let already_executed = if resuming_this_node {
            ctx.store.get_llm_executions_by_node(&ctx.session_id, qualified_id).await?.into_iter().last()
        } else {
            None
        };

        let (text, usage) = if let Some(last) = already_executed {
            (last.text.unwrap_or_default(), last.usage)
        } else {
            let tools: Vec<ToolDeclaration> = available_tools.to_vec();

            let outcome = ctx
                .llm
                .execute(LlmExecuteParams {
                    model: None,
                    system_prompt: system_prompt.map(|s| s.to_string()),
                    input: &input,
                    tools,
                    max_retries,
                    session_id: &ctx.session_id,
                    node_id: qualified_id,
                })
                .await?;

            if !outcome.success {
                return Err(WorkflowError::LlmError(outcome.error.unwrap_or_else(|| "llm call failed".to_string())));
            }
            (outcome.text.unwrap_or_default(), outcome.usage)
        };

        if let Some(usage) = usage {
            if let Some(pool_id) = ctx.budget_pool_id.clone() {
                match ctx.budget.consume(&pool_id, usage.total_tokens as i64).await {
                    Ok(pool) => {
                        ctx.event_log
                            .push(ExecutionEvent::budget_consumed(&pool_id, usage.total_tokens as i64, pool.remaining_budget))
                            .await;
                    }
                    Err(WorkflowError::BudgetExhausted(_)) if !resuming_this_node => {
                        ctx.event_log.push(ExecutionEvent::budget_exhausted(&pool_id)).await;
                        return self
                            .suspend_for_budget(ctx, qualified_id, &pool_id, usage.total_tokens as i64)
                            .await;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(Value::String(text))
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_call_workflow(
        &self,
        ctx: &ExecutionContext<'_>,
        qualified_id: &str,
        workflow_ref: &str,
        input_mapping: Option<&crate::model::TransformExpr>,
        output_mapping: Option<&crate::model::TransformExpr>,
        requires_approval: bool,
        input: Value,
    ) -> Result<Value> {
        if requires_approval && !ctx.is_resuming(qualified_id) {
            return self.suspend_for_workflow_call(ctx, qualified_id, workflow_ref).await;
        }

        let mapped_input = match input_mapping {
            Some(expr) => transform::eval(expr, &input, &[])?,
            None => input,
        };

        let nested_output = ctx.runner.run_nested(workflow_ref, mapped_input, ctx.budget_pool_id.clone()).await?;

        match output_mapping {
            Some(expr) => transform::eval(expr, &nested_output, &[]),
            None => Ok(nested_output),
        }
    }

    async fn suspend_for_review(&self, ctx: &ExecutionContext<'_>, qualified_id: &str, llm_output: Value) -> Result<Value> {
        let approval = ApprovalRequest::new(
            &ctx.session_id,
            qualified_id,
            ApprovalType::HumanReview,
            ApprovalContext::HumanReview { llm_output },
        );
        ctx.store.create_approval(&approval).await?;
        self.mark_suspended(ctx, qualified_id, &approval.id, SessionStatus::WaitingForHumanReview, NodeStatus::WaitingForReview)
            .await?;
        Err(WorkflowError::Suspended(approval.id))
    }

    async fn suspend_for_budget(
        &self,
        ctx: &ExecutionContext<'_>,
        qualified_id: &str,
        pool_id: &str,
        requested_amount: i64,
    ) -> Result<Value> {
        let pool = ctx.budget.get(pool_id).await?;
        let approval = ApprovalRequest::new(
            &ctx.session_id,
            qualified_id,
            ApprovalType::BudgetIncrease,
            ApprovalContext::BudgetIncrease { requested_budget: requested_amount, current_usage: pool.used_budget },
        );
        ctx.store.create_approval(&approval).await?;
        self.mark_suspended(ctx, qualified_id, &approval.id, SessionStatus::WaitingForBudgetApproval, NodeStatus::WaitingForApproval)
            .await?;
        Err(WorkflowError::Suspended(approval.id))
    }

    async fn suspend_for_workflow_call(&self, ctx: &ExecutionContext<'_>, qualified_id: &str, workflow_ref: &str) -> Result<Value> {
        let approval = ApprovalRequest::new(
            &ctx.session_id,
            qualified_id,
            ApprovalType::WorkflowCall,
            ApprovalContext::WorkflowCall { workflow_ref: workflow_ref.to_string() },
        );
        ctx.store.create_approval(&approval).await?;
        self.mark_suspended(ctx, qualified_id, &approval.id, SessionStatus::WaitingForWorkflowApproval, NodeStatus::WaitingForApproval)
            .await?;
        Err(WorkflowError::Suspended(approval.id))
    }

    async fn mark_suspended(
        &self,
        ctx: &ExecutionContext<'_>,
        qualified_id: &str,
        approval_id: &str,
        session_status: SessionStatus,
        node_status: NodeStatus,
    ) -> Result<()> {
        if let Some(mut session) = ctx.store.get_session(&ctx.session_id).await? {
            session.status = session_status;
            session.touch();
            ctx.store.update_session(&session).await?;
        }

        let mut state = self
            .existing_node_state(ctx, qualified_id)
            .await?
            .unwrap_or_else(|| NodeState::new(qualified_id, Value::Null));
        state.mark_waiting(node_status, approval_id);
        ctx.store.update_node_state(&ctx.session_id, &state).await?;

        ctx.event_log.push(ExecutionEvent::session_suspended(&ctx.session_id, approval_id)).await;
        ctx.event_log
            .push(ExecutionEvent::approval_requested(approval_id, &ctx.session_id, qualified_id))
            .await;
        warn!(session_id = %ctx.session_id, node_id = qualified_id, approval_id, "execution suspended pending approval");
        Ok(())
    }
}

/// Project an edge's next input from a producer's output (§3 "Edge").
fn project_edge_output(edge: &Edge, output: &Value) -> Value {
    match (&edge.previous_node_message_output_field_name, output.as_object()) {
        (Some(field), Some(obj)) => obj.get(field).cloned().unwrap_or(Value::Null),
        _ => output.clone(),
    }
}
