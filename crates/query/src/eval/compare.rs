//! Equality and relational comparison.
//!
//! A node-set compared with anything is true if some member satisfies the
//! comparison; `!=` is the complement of `=` over the same pairwise test.
//! A node-set compared with a boolean converts the node-set to a boolean.

use super::convert::{node_string, to_boolean, to_number, to_string};
use crate::ast::CompareOp;
use alloc::string::String;
use alloc::vec::Vec;
use arbor_core::value::string_to_number;
use arbor_core::{NodeId, Tree, Value};

/// Compares two evaluated values.
pub fn compare(tree: &dyn Tree, op: CompareOp, left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::NodeSet(_), Value::Boolean(b)) => compare_booleans(op, to_boolean(left), *b),
        (Value::Boolean(b), Value::NodeSet(_)) => compare_booleans(op, *b, to_boolean(right)),
        (Value::NodeSet(nodes), _) => compare_node_set(tree, op, nodes, right),
        (_, Value::NodeSet(nodes)) => compare_node_set(tree, op.flip(), nodes, left),
        _ => compare_scalars(tree, op, left, right),
    }
}

fn compare_node_set(tree: &dyn Tree, op: CompareOp, nodes: &[NodeId], other: &Value) -> bool {
    match op {
        CompareOp::Eq => any_equal(tree, nodes, other),
        CompareOp::Ne => !any_equal(tree, nodes, other),
        _ => {
            let others: Vec<f64> = match other {
                Value::NodeSet(right) => right
                    .iter()
                    .map(|n| string_to_number(&node_string(tree, *n)))
                    .collect(),
                _ => alloc::vec![to_number(tree, other)],
            };
            nodes.iter().any(|n| {
                let l = string_to_number(&node_string(tree, *n));
                others.iter().any(|r| compare_numbers(op, l, *r))
            })
        }
    }
}

fn any_equal(tree: &dyn Tree, nodes: &[NodeId], other: &Value) -> bool {
    match other {
        Value::NodeSet(right) => {
            let right: Vec<String> = right.iter().map(|n| node_string(tree, *n)).collect();
            nodes.iter().any(|n| right.contains(&node_string(tree, *n)))
        }
        Value::Number(r) => nodes
            .iter()
            .any(|n| string_to_number(&node_string(tree, *n)) == *r),
        Value::String(r) => nodes.iter().any(|n| node_string(tree, *n) == *r),
        Value::Boolean(b) => !nodes.is_empty() == *b,
    }
}

fn compare_scalars(tree: &dyn Tree, op: CompareOp, left: &Value, right: &Value) -> bool {
    if !op.is_equality() {
        return compare_numbers(op, to_number(tree, left), to_number(tree, right));
    }
    let equal = match (left, right) {
        (Value::Boolean(_), _) | (_, Value::Boolean(_)) => to_boolean(left) == to_boolean(right),
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            to_number(tree, left) == to_number(tree, right)
        }
        _ => to_string(tree, left) == to_string(tree, right),
    };
    (op == CompareOp::Eq) == equal
}

fn compare_booleans(op: CompareOp, left: bool, right: bool) -> bool {
    match op {
        CompareOp::Eq => left == right,
        CompareOp::Ne => left != right,
        _ => compare_numbers(op, left as u8 as f64, right as u8 as f64),
    }
}

#[inline]
fn compare_numbers(op: CompareOp, left: f64, right: f64) -> bool {
    match op {
        CompareOp::Eq => left == right,
        CompareOp::Ne => left != right,
        CompareOp::Lt => left < right,
        CompareOp::Le => left <= right,
        CompareOp::Gt => left > right,
        CompareOp::Ge => left >= right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use arbor_storage::MemoryTree;

    fn fixture() -> (MemoryTree, NodeId, NodeId) {
        let tree = MemoryTree::new("root");
        let a = tree.append(tree.root(), "a", Some("1")).unwrap();
        let b = tree.append(tree.root(), "b", Some("3")).unwrap();
        (tree, a, b)
    }

    #[test]
    fn test_node_set_equality_is_existential() {
        let (tree, a, b) = fixture();
        let set = Value::NodeSet(vec![a, b]);

        assert!(compare(&tree, CompareOp::Eq, &set, &Value::Number(3.0)));
        assert!(compare(&tree, CompareOp::Eq, &set, &Value::from("1")));
        assert!(!compare(&tree, CompareOp::Eq, &set, &Value::Number(2.0)));
        // != is the complement of = over the same pairwise test
        assert!(!compare(&tree, CompareOp::Ne, &set, &Value::Number(3.0)));
        assert!(compare(&tree, CompareOp::Ne, &set, &Value::Number(2.0)));
    }

    #[test]
    fn test_node_set_relational_flips() {
        let (tree, a, b) = fixture();
        let set = Value::NodeSet(vec![a, b]);

        assert!(compare(&tree, CompareOp::Gt, &set, &Value::Number(2.0)));
        assert!(compare(&tree, CompareOp::Lt, &Value::Number(2.0), &set));
        assert!(compare(&tree, CompareOp::Gt, &Value::Number(3.0), &set));
        assert!(!compare(&tree, CompareOp::Gt, &Value::Number(1.0), &set));
        assert!(!compare(&tree, CompareOp::Lt, &set, &Value::Number(1.0)));
    }

    #[test]
    fn test_node_set_pairs() {
        let (tree, a, b) = fixture();
        let other = tree.append(tree.root(), "c", Some("3")).unwrap();

        let left = Value::NodeSet(vec![a, b]);
        let right = Value::NodeSet(vec![other]);
        assert!(compare(&tree, CompareOp::Eq, &left, &right));
        assert!(compare(&tree, CompareOp::Lt, &Value::NodeSet(vec![a]), &right));
        assert!(!compare(&tree, CompareOp::Eq, &left, &Value::NodeSet(vec![])));
    }

    #[test]
    fn test_node_set_against_boolean() {
        let (tree, a, _) = fixture();
        let set = Value::NodeSet(vec![a]);
        let empty = Value::NodeSet(vec![]);

        assert!(compare(&tree, CompareOp::Eq, &set, &Value::Boolean(true)));
        assert!(compare(&tree, CompareOp::Eq, &Value::Boolean(false), &empty));
        assert!(compare(&tree, CompareOp::Ne, &empty, &Value::Boolean(true)));
    }

    #[test]
    fn test_scalar_precedence() {
        let tree = MemoryTree::new("root");
        assert!(compare(&tree, CompareOp::Eq, &Value::Boolean(true), &Value::from("x")));
        assert!(compare(&tree, CompareOp::Eq, &Value::Number(1.0), &Value::from("1.0")));
        assert!(!compare(&tree, CompareOp::Eq, &Value::from("1"), &Value::from("1.0")));
        assert!(compare(&tree, CompareOp::Ge, &Value::from("4"), &Value::Number(4.0)));
        assert!(!compare(&tree, CompareOp::Eq, &Value::Number(f64::NAN), &Value::Number(f64::NAN)));
    }
}
