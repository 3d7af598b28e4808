//! Workflow and node tree definitions

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::transform::TransformExpr;

/// Declared field of an `object`/`taggedUnion` message type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectField {
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub type_: Box<NodeMessageType>,
}

/// Recursive value-type algebra used to describe node `inputType`/`outputType`.
///
/// Represented as a tagged enum (one constructor per `type` discriminant) so a
/// typed reimplementation never has to reach for dynamic typing to walk it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeMessageType {
    String,
    Enum { values: Vec<String> },
    Array { of: Box<NodeMessageType> },
    Optional { of: Box<NodeMessageType> },
    Object { fields: HashMap<String, ObjectField> },
    TaggedUnion { tags: HashMap<String, ObjectField> },
    Ref { name: String },
}

/// A tool declaration attached to an LLM node. The implementation is supplied
/// out-of-band by the caller's tool registry and resolved by `name` at dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// An edge between two nodes (or sentinel ids) inside a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_node_message_output_field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_input_field_name: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// Per-node variant. Every variant implicitly carries `input_type`/`output_type`
/// which are stored alongside it on `Node`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NodeVariant {
    Group {
        label: String,
        nodes: HashMap<String, Node>,
        edges: Vec<Edge>,
        entry_point: String,
        exit_point: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
    },
    Llm {
        #[serde(default)]
        max_retries: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        system_prompt: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        available_tools: Option<Vec<ToolDeclaration>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reviewers: Option<Vec<String>>,
        #[serde(default)]
        requires_human_review: bool,
    },
    Transform {
        #[serde(rename = "fn")]
        fn_: TransformExpr,
    },
    CallWorkflow {
        workflow_ref: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_mapping: Option<TransformExpr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_mapping: Option<TransformExpr>,
        #[serde(default)]
        requires_approval: bool,
    },
    Stream {},
    Generator {},
}

/// A node in the workflow tree: a dispatchable variant plus its declared types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    #[serde(flatten)]
    pub variant: NodeVariant,
    pub input_type: NodeMessageType,
    pub output_type: NodeMessageType,
}

/// A workflow's node tree plus named typedefs referenced via `NodeMessageType::Ref`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    pub root: Node,
    #[serde(default)]
    pub typedefs: HashMap<String, NodeMessageType>,
}

/// Immutable, versioned workflow record as persisted by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredWorkflow {
    pub id: String,
    pub name: String,
    pub version: u32,
    pub definition: WorkflowDefinition,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl StoredWorkflow {
    pub fn new(name: impl Into<String>, definition: WorkflowDefinition) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            version: 1,
            definition,
            created_at: now,
            updated_at: now,
            metadata: None,
        }
    }
}
