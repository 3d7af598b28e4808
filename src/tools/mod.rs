//! Tool bridge (§4.5)
//!
//! Adapts caller-supplied tool implementations to the shape the LLM executor
//! hands the provider, and logs every invocation against the store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::error::Result;
use crate::model::ToolCallLog;
use crate::store::Store;

/// Context passed to a tool at invocation time.
#[derive(Debug, Clone, Default)]
pub struct ToolCallContext {
    pub tool_call_id: String,
    pub messages: Option<Value>,
}

/// A caller-supplied tool implementation. Mirrors the provider-facing shape
/// `{ description, inputSchema, execute(input, context) }` from §4.5.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;
    async fn execute(&self, input: Value, ctx: &ToolCallContext) -> Result<Value>;
}

/// Normalizes an arbitrary caller-supplied schema value into an object
/// schema: already-structured schemas pass through, bare field-records are
/// wrapped as `{ type: "object", properties: <record> }`.
pub fn normalize_schema(schema: Value) -> Value {
    match &schema {
        Value::Object(map) if map.contains_key("type") || map.contains_key("properties") => schema,
        Value::Object(fields) => {
            serde_json::json!({ "type": "object", "properties": fields })
        }
        other => other.clone(),
    }
}

/// Registry of tools available to an LLM node, keyed by name, plus
/// best-effort invocation logging.
pub struct ToolBridge {
    tools: HashMap<String, Arc<dyn Tool>>,
    store: Arc<dyn Store>,
}

impl ToolBridge {
    pub fn new(store: Arc<dyn Store>, tools: Vec<Arc<dyn Tool>>) -> Self {
        let tools = tools.into_iter().map(|t| (t.name().to_string(), t)).collect();
        Self { tools, store }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Synthesize a `toolCallId` when the provider did not supply one.
    pub fn synthesize_call_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Invoke `tool_name` and log the call against `execution_id`. Logging
    /// failures are swallowed (best-effort) and never mask the tool result.
    pub async fn invoke(
        &self,
        execution_id: &str,
        tool_name: &str,
        tool_call_id: Option<String>,
        args: Value,
    ) -> Result<Value> {
        let tool_call_id = tool_call_id.unwrap_or_else(Self::synthesize_call_id);
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| crate::error::WorkflowError::ToolExecution(format!("unknown tool: {}", tool_name)))?;

        let ctx = ToolCallContext { tool_call_id: tool_call_id.clone(), messages: None };
        let started = std::time::Instant::now();
        let outcome = tool.execute(args.clone(), &ctx).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut log = ToolCallLog::new(execution_id, &tool_call_id, tool_name, args);
        log.duration_ms = Some(duration_ms);
        match &outcome {
            Ok(result) => log.result = Some(result.clone()),
            Err(e) => log.error = Some(e.to_string()),
        }
        if let Err(log_err) = self.store.log_tool_call(&log).await {
            warn!(tool_name, error = %log_err, "failed to persist tool call log (best-effort)");
        }

        outcome
    }
}
