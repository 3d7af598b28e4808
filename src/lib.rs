//! Durable graph execution core for AI-agent workflows.
//!
//! A [`RunController`](controller::RunController) drives a [`Session`](model::Session)
//! through a workflow's node graph, evaluating [`TransformExpr`](model::TransformExpr)
//! nodes directly and delegating LLM and tool-call nodes to the
//! [`LlmExecutor`](llm::LlmExecutor) / [`ToolBridge`](tools::ToolBridge). Budget
//! consumption and human-review gates can suspend a session mid-run; resuming
//! it re-enters the graph from the last waiting node.
//!
//! ## Quick start
//!
//! ```no_run
//! use workflow_runtime::app::{Application, ApplicationOptions};
//!
//! # async fn run() -> workflow_runtime::error::Result<()> {
//! let app = Application::initialize(ApplicationOptions::default()).await?;
//! // app.save_workflow(&workflow).await?;
//! // let outcome = app.execute_workflow(&workflow_id, input, None).await?;
//! app.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod budget;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod executor;
pub mod llm;
pub mod model;
pub mod retry;
pub mod store;
pub mod tools;
pub mod transform;

pub use app::{Application, ApplicationOptions};
pub use budget::BudgetManager;
pub use config::RuntimeConfig;
pub use controller::{RunController, RunOptions, RunOutcome};
pub use error::{Result, WorkflowError};
pub use events::{EventLog, ExecutionEvent};
pub use executor::{ExecutionContext, GraphExecutor, NestedRunner};
pub use llm::{LlmExecutor, LlmProvider};
pub use tools::{Tool, ToolBridge};
