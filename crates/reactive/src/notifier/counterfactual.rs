//! Counterfactual evaluation of scalar expressions.
//!
//! When one argument of a scalar expression reports a change, the
//! expression is evaluated twice with that argument pinned to a literal:
//! to the old value against the reverted tree, then to the new value
//! against the restored tree. The changed argument is never evaluated; the
//! others see the tree state matching the pinned value.

use alloc::format;
use arbor_core::{Error, Result, Reverted, Value};
use arbor_query::{Context, Evaluator, ExprId, ExprKind, ExpressionArena};

/// Returns true if a change of an argument of `kind` can be replayed by
/// pinning the argument.
///
/// Node-set arguments are pinned to their old and new members; reading the
/// old members against the reverted tree yields their old values.
pub fn applies_to(kind: &ExprKind) -> bool {
    matches!(
        kind,
        ExprKind::Arithmetic { .. }
            | ExprKind::Negate(_)
            | ExprKind::Compare { .. }
            | ExprKind::Logical { .. }
            | ExprKind::Count(_)
    )
}

/// Evaluates `expr` with `changed` pinned to `old` (reverted) and `new`
/// (restored). Returns `(old_result, new_result)`.
pub fn evaluate(
    arena: &ExpressionArena,
    expr: ExprId,
    ctx: &Context,
    changed: ExprId,
    old: &Value,
    new: &Value,
) -> Result<(Value, Value)> {
    if arena.parent(changed) != Some(expr) {
        return Err(Error::invalid_operation(format!(
            "{} is not an argument of {}",
            arena.describe(changed),
            arena.describe(expr)
        )));
    }

    let guard = Reverted::enter(ctx.tree())?;
    let before = Evaluator::with_placeholder(arena, changed, old).evaluate(expr, ctx);
    guard.exit()?;
    let before = before.map_err(|e| fault(arena, expr, "old", e))?;

    let after = Evaluator::with_placeholder(arena, changed, new)
        .evaluate(expr, ctx)
        .map_err(|e| fault(arena, expr, "new", e))?;
    Ok((before, after))
}

fn fault(arena: &ExpressionArena, expr: ExprId, phase: &str, error: Error) -> Error {
    match error {
        Error::ExpressionFault { .. } => error,
        other => Error::fault(format!(
            "evaluating {} value of {}: {}",
            phase,
            arena.describe(expr),
            other
        )),
    }
}
