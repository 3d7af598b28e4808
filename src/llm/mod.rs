//! LLM executor and provider contract (§4.3, §6)

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::warn;

use crate::error::{Result, WorkflowError};
use crate::model::{LlmExecutionRecord, ProviderToolCall, ToolDeclaration, Usage};
use crate::retry::{with_retry, RetryConfig};
use crate::store::Store;
use crate::tools::ToolBridge;

/// Calls a declared tool through the tool bridge and returns its result,
/// bound to one execution so every call lands a [`crate::model::ToolCallLog`].
pub type ToolInvoker = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// One tool declaration handed to the provider, in the shape §4.5 describes,
/// with a live callback a provider's internal tool loop can call into.
#[derive(Clone)]
pub struct ProviderTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub invoke: ToolInvoker,
}

impl std::fmt::Debug for ProviderTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish()
    }
}

/// Request handed to a [`LlmProvider`].
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: Option<String>,
    pub system: Option<String>,
    pub prompt: String,
    pub tools: Vec<ProviderTool>,
    pub max_retries: usize,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Response from a [`LlmProvider`] call.
#[derive(Debug, Clone, Default)]
pub struct GenerateResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ProviderToolCall>,
    pub usage: Option<Usage>,
}

/// The provider contract the executor calls against. No concrete network
/// transport is bundled; implement this against whatever backend you use.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate_text(&self, request: GenerateRequest) -> Result<GenerateResponse>;
}

/// The outcome of one LLM node execution. Never an `Err` on provider
/// failure — failure is represented as `success = false`.
#[derive(Debug, Clone)]
pub struct LlmOutcome {
    pub success: bool,
    pub text: Option<String>,
    pub tool_calls: Vec<ProviderToolCall>,
    pub usage: Option<Usage>,
    pub error: Option<String>,
}

/// Parameters for one LLM node execution.
pub struct LlmExecuteParams<'a> {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub input: &'a Value,
    pub tools: Vec<ToolDeclaration>,
    pub max_retries: u32,
    pub session_id: &'a str,
    pub node_id: &'a str,
}

/// Serializes input, invokes the provider with retry, records the
/// execution, and never throws on provider failure.
pub struct LlmExecutor {
    provider: Arc<dyn LlmProvider>,
    store: Arc<dyn Store>,
    tool_bridge: Arc<ToolBridge>,
}

impl LlmExecutor {
    pub fn new(provider: Arc<dyn LlmProvider>, store: Arc<dyn Store>, tool_bridge: Arc<ToolBridge>) -> Self {
        Self { provider, store, tool_bridge }
    }

    /// Flatten `input` to a prompt string: pass strings through as-is,
    /// canonicalize everything else as JSON.
    fn serialize_prompt(input: &Value) -> String {
        match input {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub async fn execute(&self, params: LlmExecuteParams<'_>) -> Result<LlmOutcome> {
        let prompt = Self::serialize_prompt(params.input);
        let mut record = LlmExecutionRecord::new(params.session_id, params.node_id);
        let execution_id = record.id.clone();

        let retry_config = RetryConfig::new(params.max_retries as usize, 1, 60, 2.0);
        let op_id = format!("{}:{}", params.session_id, params.node_id);

        // Wrap each declared tool into a provider-shaped tool whose `invoke`
        // calls back into the tool bridge for this execution (§4.3 step 2).
        let provider_tools: Vec<ProviderTool> = params
            .tools
            .iter()
            .map(|decl| {
                let tool_bridge = self.tool_bridge.clone();
                let execution_id = execution_id.clone();
                let tool_name = decl.name.clone();
                ProviderTool {
                    name: decl.name.clone(),
                    description: decl.description.clone(),
                    input_schema: decl.input_schema.clone(),
                    invoke: Arc::new(move |args: Value| {
                        let tool_bridge = tool_bridge.clone();
                        let execution_id = execution_id.clone();
                        let tool_name = tool_name.clone();
                        Box::pin(async move { tool_bridge.invoke(&execution_id, &tool_name, None, args).await })
                    }),
                }
            })
            .collect();

        let request_template = GenerateRequest {
            model: params.model.clone(),
            system: params.system_prompt.clone(),
            prompt: prompt.clone(),
            tools: provider_tools,
            max_retries: params.max_retries as usize,
            temperature: None,
            max_tokens: None,
        };

        let result = with_retry(&retry_config, &op_id, || {
            let request = request_template.clone();
            let provider = self.provider.clone();
            async move { provider.generate_text(request).await.map_err(|e| e.to_string()) }
        })
        .await;

        let outcome = match result {
            Ok(mut response) => {
                // A provider may report a tool call without having invoked
                // it inline through `ProviderTool::invoke`; run those
                // through the bridge now so every call is logged regardless
                // of which style the provider uses.
                for call in response.tool_calls.iter_mut() {
                    if call.result.is_none() {
                        match self
                            .tool_bridge
                            .invoke(&execution_id, &call.tool_name, Some(call.tool_call_id.clone()), call.args.clone())
                            .await
                        {
                            Ok(result) => call.result = Some(result),
                            Err(e) => warn!(tool_name = %call.tool_name, error = %e, "tool invocation failed"),
                        }
                    }
                }
                record.success = true;
                record.text = response.text.clone();
                record.tool_calls = Some(response.tool_calls.clone());
                record.usage = response.usage;
                LlmOutcome {
                    success: true,
                    text: response.text,
                    tool_calls: response.tool_calls,
                    usage: response.usage,
                    error: None,
                }
            }
            Err(message) => {
                warn!(session_id = params.session_id, node_id = params.node_id, error = %message, "llm execution failed");
                record.success = false;
                record.error = Some(message.clone());
                LlmOutcome {
                    success: false,
                    text: None,
                    tool_calls: Vec::new(),
                    usage: None,
                    error: Some(message),
                }
            }
        };

        if let Err(e) = self.store.save_llm_execution(&record).await {
            warn!(execution_id, error = %e, "failed to persist llm execution record");
        }

        Ok(outcome)
    }
}

/// Deterministic in-memory provider for tests: echoes the prompt back as
/// `text` and reports fixed usage, never calling a tool.
pub struct EchoProvider {
    pub usage: Usage,
}

impl Default for EchoProvider {
    fn default() -> Self {
        Self { usage: Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 } }
    }
}

#[async_trait]
impl LlmProvider for EchoProvider {
    async fn generate_text(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        Ok(GenerateResponse {
            text: Some(request.prompt),
            tool_calls: Vec::new(),
            usage: Some(self.usage),
        })
    }
}

/// Test provider that fails its first `fail_times` calls, then succeeds —
/// used to exercise the retry path.
pub struct FlakyProvider {
    pub fail_times: std::sync::atomic::AtomicUsize,
}

impl FlakyProvider {
    pub fn new(fail_times: usize) -> Self {
        Self { fail_times: std::sync::atomic::AtomicUsize::new(fail_times) }
    }
}

#[async_trait]
impl LlmProvider for FlakyProvider {
    async fn generate_text(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        use std::sync::atomic::Ordering;
        let remaining = self.fail_times.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_times.fetch_sub(1, Ordering::SeqCst);
            return Err(WorkflowError::LlmError("transient provider error".to_string()));
        }
        Ok(GenerateResponse { text: Some(request.prompt), tool_calls: Vec::new(), usage: None })
    }
}
