//! Transform expression algebra (see `crate::transform` for the evaluator)

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A path into a tree-shaped value, e.g. `["payload", "items"]`.
pub type Path = Vec<String>;

/// The small recursive expression language used by transform nodes and
/// call-workflow input/output mappings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TransformExpr {
    /// Always yields `value`, ignoring the input data entirely.
    Const { value: Value },

    /// Yields the value at `base_path ++ path`, or the absent sentinel (JSON null)
    /// if any segment of the path is missing.
    Get {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<Path>,
    },

    /// Evaluates `fn_` with the base path extended by `path`, so nested
    /// expressions don't need to repeat a long prefix.
    With { path: Path, #[serde(rename = "fn")] fn_: Box<TransformExpr> },

    /// Looks up the value at `base_path ++ path`, dispatches on its tag (an
    /// object's `tag` field, or its string form) into `branches`.
    If {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<Path>,
        branches: HashMap<String, Box<TransformExpr>>,
    },

    /// Evaluates `fn_` once per element of the array at `base_path ++ path`,
    /// with each element exposed to `fn_` at `["item", ...]`.
    Map {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<Path>,
        #[serde(rename = "fn")]
        fn_: Box<TransformExpr>,
    },

    /// Builds a record with each field evaluated independently against the
    /// unmodified base path.
    Object { fields: HashMap<String, Box<TransformExpr>> },

    /// Builds a record with a literal `tag` field plus independently
    /// evaluated payload fields.
    TaggedUnion {
        tag: String,
        fields: HashMap<String, Box<TransformExpr>>,
    },
}
