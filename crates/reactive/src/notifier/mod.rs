//! Incremental notifiers.
//!
//! Two strategies turn a child change into the change of its parent:
//! counterfactual replay for scalar arguments of scalar expressions, and a
//! full old/new evaluation for everything else. Node-set results are then
//! reported as exact insert/remove runs, scalar results as typed changes.

pub mod counterfactual;
pub mod exact;

use crate::listener::Notification;
use alloc::vec;
use alloc::vec::Vec;
use arbor_core::{Result, Reverted, Value};
use arbor_query::{Context, Evaluator, ExprId, ExpressionArena};

/// Evaluates `expr` against the reverted tree, then the restored tree.
pub fn dual_evaluate(
    arena: &ExpressionArena,
    expr: ExprId,
    ctx: &Context,
) -> Result<(Value, Value)> {
    let eval = Evaluator::new(arena);
    let guard = Reverted::enter(ctx.tree())?;
    let before = eval.evaluate(expr, ctx);
    guard.exit()?;
    Ok((before?, eval.evaluate(expr, ctx)?))
}

/// Returns the notifications describing the change from `old` to `new`.
///
/// A change of result kind is reported as an opaque change.
pub fn notifications(old: &Value, new: &Value) -> Vec<Notification> {
    match (old, new) {
        (Value::NodeSet(old), Value::NodeSet(new)) => exact::delta(old, new),
        _ if old.same(new) => Vec::new(),
        (Value::Number(old), Value::Number(new)) => vec![Notification::Number {
            new: *new,
            old: *old,
        }],
        (Value::String(old), Value::String(new)) => vec![Notification::String {
            new: new.clone(),
            old: old.clone(),
        }],
        (Value::Boolean(_), Value::Boolean(new)) => vec![Notification::Boolean(*new)],
        _ => vec![Notification::Opaque],
    }
}

/// Returns the notifications delivering `value` to a new listener: a
/// node-set as one insert, a scalar as a change from the type default.
pub fn initial_notifications(value: &Value) -> Vec<Notification> {
    match value {
        Value::NodeSet(nodes) if nodes.is_empty() => Vec::new(),
        Value::NodeSet(nodes) => exact::delta(&[], nodes),
        Value::Number(n) => vec![Notification::Number { new: *n, old: 0.0 }],
        Value::String(s) => vec![Notification::String {
            new: s.clone(),
            old: alloc::string::String::new(),
        }],
        Value::Boolean(b) => vec![Notification::Boolean(*b)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::NodeId;

    #[test]
    fn test_scalar_notifications() {
        assert_eq!(
            notifications(&Value::Number(12.0), &Value::Number(15.0)),
            vec![Notification::Number { new: 15.0, old: 12.0 }]
        );
        assert!(notifications(&Value::Number(f64::NAN), &Value::Number(f64::NAN)).is_empty());
        assert_eq!(
            notifications(&Value::Boolean(true), &Value::Boolean(false)),
            vec![Notification::Boolean(false)]
        );
        assert_eq!(
            notifications(&Value::from("a"), &Value::Number(1.0)),
            vec![Notification::Opaque]
        );
    }

    #[test]
    fn test_initial_notifications() {
        let nodes = vec![NodeId(1), NodeId(2)];
        assert_eq!(
            initial_notifications(&Value::NodeSet(nodes.clone())),
            vec![Notification::Insert {
                nodes,
                start: 0,
                count: 2
            }]
        );
        assert!(initial_notifications(&Value::NodeSet(vec![])).is_empty());
        assert_eq!(
            initial_notifications(&Value::Number(0.0)),
            vec![Notification::Number { new: 0.0, old: 0.0 }]
        );
    }
}
