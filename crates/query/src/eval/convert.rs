//! Conversions between result kinds.
//!
//! Node-set conversions read node values through the tree, so reading the
//! value of a lazily synced node forces it to populate first.

use alloc::string::{String, ToString};
use arbor_core::value::{number_to_bool, number_to_string, string_to_number};
use arbor_core::{NodeId, ResultType, Tree, Value};

/// Returns the string value of a node, or the empty string.
#[inline]
pub fn node_string(tree: &dyn Tree, node: NodeId) -> String {
    tree.value(node).unwrap_or_default()
}

/// Converts a value to a string.
pub fn to_string(tree: &dyn Tree, value: &Value) -> String {
    match value {
        Value::NodeSet(nodes) => nodes
            .first()
            .map(|n| node_string(tree, *n))
            .unwrap_or_default(),
        Value::Number(n) => number_to_string(*n),
        Value::String(s) => s.clone(),
        Value::Boolean(b) => b.to_string(),
    }
}

/// Converts a value to a number.
pub fn to_number(tree: &dyn Tree, value: &Value) -> f64 {
    match value {
        Value::NodeSet(_) => string_to_number(&to_string(tree, value)),
        Value::Number(n) => *n,
        Value::String(s) => string_to_number(s),
        Value::Boolean(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
    }
}

/// Converts a value to a boolean.
pub fn to_boolean(value: &Value) -> bool {
    match value {
        Value::NodeSet(nodes) => !nodes.is_empty(),
        Value::Number(n) => number_to_bool(*n),
        Value::String(s) => !s.is_empty(),
        Value::Boolean(b) => *b,
    }
}

/// Converts a scalar to the scalar kind of `target`.
///
/// Node-sets cannot be produced from scalars; such a request returns the
/// value unchanged and the caller reports the mismatch.
pub fn coerce(tree: &dyn Tree, value: Value, target: ResultType) -> Value {
    match target {
        ResultType::NodeSet => value,
        ResultType::Number => Value::Number(to_number(tree, &value)),
        ResultType::String => Value::String(to_string(tree, &value)),
        ResultType::Boolean => Value::Boolean(to_boolean(&value)),
    }
}
