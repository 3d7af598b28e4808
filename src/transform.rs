//! Transform expression evaluator
//!
//! Pure interpreter for `TransformExpr` over arbitrary tree-shaped JSON
//! values. No I/O, no randomness, no clock: for identical `(expr, data)` the
//! result is byte-identical on every call.

use serde_json::{Map, Value};

use crate::error::{Result, TransformErrorKind, WorkflowError};
use crate::model::transform::Path;
use crate::model::TransformExpr;

/// Evaluate `expr` against `data`, resolving paths relative to `base_path`.
pub fn eval(expr: &TransformExpr, data: &Value, base_path: &[String]) -> Result<Value> {
    match expr {
        TransformExpr::Const { value } => Ok(value.clone()),

        TransformExpr::Get { path } => {
            let full_path = join_path(base_path, path.as_deref());
            Ok(get_at_path(data, &full_path).cloned().unwrap_or(Value::Null))
        }

        TransformExpr::With { path, fn_ } => {
            let extended = join_path(base_path, Some(path));
            eval(fn_, data, &extended)
        }

        TransformExpr::If { path, branches } => {
            let full_path = join_path(base_path, path.as_deref());
            let value = get_at_path(data, &full_path).cloned().unwrap_or(Value::Null);
            let tag = dispatch_tag(&value);
            let branch = branches.get(&tag).ok_or_else(|| {
                WorkflowError::TransformError(TransformErrorKind::NoMatchingBranch { tag: tag.clone() })
            })?;
            eval(branch, data, base_path)
        }

        TransformExpr::Map { path, fn_ } => {
            let full_path = join_path(base_path, path.as_deref());
            let value = get_at_path(data, &full_path).cloned().unwrap_or(Value::Null);
            let items = value.as_array().cloned().ok_or_else(|| {
                WorkflowError::TransformError(TransformErrorKind::TypeMismatch {
                    expected: "array",
                    path: full_path.join("."),
                })
            })?;

            let mut results = Vec::with_capacity(items.len());
            for item in items {
                let overlaid = overlay_item(data, item);
                results.push(eval(fn_, &overlaid, base_path)?);
            }
            Ok(Value::Array(results))
        }

        TransformExpr::Object { fields } => {
            let mut out = Map::with_capacity(fields.len());
            for (key, field_expr) in fields {
                out.insert(key.clone(), eval(field_expr, data, base_path)?);
            }
            Ok(Value::Object(out))
        }

        TransformExpr::TaggedUnion { tag, fields } => {
            let mut out = Map::with_capacity(fields.len() + 1);
            out.insert("tag".to_string(), Value::String(tag.clone()));
            for (key, field_expr) in fields {
                out.insert(key.clone(), eval(field_expr, data, base_path)?);
            }
            Ok(Value::Object(out))
        }
    }
}

/// Overlay `data` with `{ item: element }` so a `map` body's inner
/// expression can reach the current element via `["item", ...]`.
fn overlay_item(data: &Value, element: Value) -> Value {
    let mut overlaid = match data {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    overlaid.insert("item".to_string(), element);
    Value::Object(overlaid)
}

fn join_path(base: &[String], extra: Option<&Path>) -> Vec<String> {
    let mut full = base.to_vec();
    if let Some(extra) = extra {
        full.extend(extra.iter().cloned());
    }
    full
}

/// Walk `path` through `value`, yielding `None` (the absent sentinel) as
/// soon as a segment is missing instead of erroring.
fn get_at_path<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Dispatch tag for `if`: an object's `tag` field if present, else the
/// value's string form.
fn dispatch_tag(value: &Value) -> String {
    if let Some(tag) = value.as_object().and_then(|obj| obj.get("tag")) {
        if let Some(s) = tag.as_str() {
            return s.to_string();
        }
        return tag.to_string();
    }
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn boxed(expr: TransformExpr) -> Box<TransformExpr> {
        Box::new(expr)
    }

    #[test]
    fn const_ignores_data() {
        let expr = TransformExpr::Const { value: json!("hi") };
        assert_eq!(eval(&expr, &json!({"a": 1}), &[]).unwrap(), json!("hi"));
    }

    #[test]
    fn get_missing_field_yields_null_not_error() {
        let expr = TransformExpr::Get { path: Some(vec!["missing".into()]) };
        assert_eq!(eval(&expr, &json!({"a": 1}), &[]).unwrap(), Value::Null);
    }

    #[test]
    fn scenario_a_transform_chain() {
        let mut fields = HashMap::new();
        fields.insert("greeting".to_string(), boxed(TransformExpr::Const { value: json!("hi") }));
        fields.insert(
            "name".to_string(),
            boxed(TransformExpr::Get { path: Some(vec!["who".into()]) }),
        );
        let expr = TransformExpr::Object { fields };
        let out = eval(&expr, &json!({"who": "Ada"}), &[]).unwrap();
        assert_eq!(out, json!({"greeting": "hi", "name": "Ada"}));
    }

    #[test]
    fn if_dispatches_on_tag_field() {
        let mut branches = HashMap::new();
        branches.insert("ok".to_string(), boxed(TransformExpr::Const { value: json!(1) }));
        branches.insert("err".to_string(), boxed(TransformExpr::Const { value: json!(0) }));
        let expr = TransformExpr::If { path: None, branches };
        let out = eval(&expr, &json!({"tag": "err"}), &[]).unwrap();
        assert_eq!(out, json!(0));
    }

    #[test]
    fn if_no_matching_branch_fails() {
        let mut branches = HashMap::new();
        branches.insert("ok".to_string(), boxed(TransformExpr::Const { value: json!(1) }));
        let expr = TransformExpr::If { path: None, branches };
        let err = eval(&expr, &json!("nope"), &[]).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::TransformError(TransformErrorKind::NoMatchingBranch { .. })
        ));
    }

    #[test]
    fn map_over_non_array_fails_type_mismatch() {
        let expr = TransformExpr::Map {
            path: None,
            fn_: boxed(TransformExpr::Get { path: None }),
        };
        let err = eval(&expr, &json!({"not": "an array"}), &[]).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::TransformError(TransformErrorKind::TypeMismatch { .. })
        ));
    }

    #[test]
    fn map_overlays_item_for_inner_expr() {
        let expr = TransformExpr::Map {
            path: Some(vec!["items".into()]),
            fn_: boxed(TransformExpr::Get { path: Some(vec!["item".into(), "n".into()]) }),
        };
        let data = json!({"items": [{"n": 1}, {"n": 2}, {"n": 3}]});
        let out = eval(&expr, &data, &[]).unwrap();
        assert_eq!(out, json!([1, 2, 3]));
    }

    #[test]
    fn with_extends_base_path() {
        let expr = TransformExpr::With {
            path: vec!["payload".into()],
            fn_: boxed(TransformExpr::Get { path: Some(vec!["value".into()]) }),
        };
        let out = eval(&expr, &json!({"payload": {"value": 42}}), &[]).unwrap();
        assert_eq!(out, json!(42));
    }

    #[test]
    fn determinism_repeated_eval_byte_identical() {
        let mut fields = HashMap::new();
        fields.insert("x".to_string(), boxed(TransformExpr::Get { path: Some(vec!["x".into()]) }));
        let expr = TransformExpr::Object { fields };
        let data = json!({"x": [1, 2, {"y": "z"}]});
        let a = eval(&expr, &data, &[]).unwrap();
        let b = eval(&expr, &data, &[]).unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
    }
}
