//! Expression evaluation.
//!
//! `Evaluator` walks an expression in an arena against a `Context`. It can
//! pin one expression to a literal value, which is how a change of one
//! argument is replayed without evaluating that argument again.

pub mod compare;
pub mod convert;

use crate::ast::{ExprId, ExprKind, ExpressionArena, LogicalOp};
use crate::context::Context;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use arbor_core::{Error, NodeId, Result, ResultType, Value};

/// Evaluates expressions of one arena.
#[derive(Clone, Copy)]
pub struct Evaluator<'a> {
    arena: &'a ExpressionArena,
    placeholder: Option<(ExprId, &'a Value)>,
}

impl<'a> Evaluator<'a> {
    /// Creates an evaluator.
    pub fn new(arena: &'a ExpressionArena) -> Self {
        Self {
            arena,
            placeholder: None,
        }
    }

    /// Creates an evaluator that reads `value` wherever `expr` is evaluated.
    pub fn with_placeholder(arena: &'a ExpressionArena, expr: ExprId, value: &'a Value) -> Self {
        Self {
            arena,
            placeholder: Some((expr, value)),
        }
    }

    /// Returns the arena.
    pub fn arena(&self) -> &'a ExpressionArena {
        self.arena
    }

    /// Returns the result type of `id` in `ctx`.
    pub fn result_type(&self, id: ExprId, ctx: &Context) -> Result<ResultType> {
        if let Some(value) = self.pinned(id) {
            return Ok(value.result_type());
        }
        match self.arena.kind(id) {
            ExprKind::Variable(name) => match self.arena.defining_clause(id, name) {
                Some(clause) => self.result_type(clause, ctx),
                None => ctx
                    .variable(name)
                    .map(|v| v.result_type())
                    .ok_or_else(|| Error::fault(format!("undefined variable ${}", name))),
            },
            ExprKind::Conditional { then, .. } => self.result_type(*then, ctx),
            ExprKind::Let { body, .. } => self.result_type(*body, ctx),
            _ => self
                .arena
                .static_type(id)
                .ok_or_else(|| Error::fault(format!("untyped expression {}", id))),
        }
    }

    /// Evaluates `id` in `ctx`.
    pub fn evaluate(&self, id: ExprId, ctx: &Context) -> Result<Value> {
        if let Some(value) = self.pinned(id) {
            return Ok(value.clone());
        }
        match self.arena.kind(id) {
            ExprKind::Literal(value) => Ok(value.clone()),
            ExprKind::Variable(name) => ctx
                .variable(name)
                .ok_or_else(|| Error::fault(format!("undefined variable ${}", name))),
            ExprKind::Path(path) => path.evaluate(ctx).map(Value::NodeSet),
            ExprKind::Arithmetic { op, left, right } => {
                let l = self.number_of(*left, ctx)?;
                let r = self.number_of(*right, ctx)?;
                Ok(Value::Number(op.apply(l, r)))
            }
            ExprKind::Negate(arg) => Ok(Value::Number(-self.number_of(*arg, ctx)?)),
            ExprKind::Compare { op, left, right } => {
                let l = self.evaluate(*left, ctx)?;
                let r = self.evaluate(*right, ctx)?;
                Ok(Value::Boolean(compare::compare(ctx.tree(), *op, &l, &r)))
            }
            ExprKind::Logical { op, left, right } => {
                let l = convert::to_boolean(&self.evaluate(*left, ctx)?);
                let result = match (op, l) {
                    (LogicalOp::And, false) => false,
                    (LogicalOp::Or, true) => true,
                    _ => convert::to_boolean(&self.evaluate(*right, ctx)?),
                };
                Ok(Value::Boolean(result))
            }
            ExprKind::Count(arg) => Ok(Value::Number(self.nodes_of(*arg, ctx)?.len() as f64)),
            ExprKind::Position => Ok(Value::Number(ctx.position() as f64)),
            ExprKind::Last => Ok(Value::Number(ctx.size() as f64)),
            ExprKind::Conditional {
                condition,
                then,
                otherwise,
            } => {
                if convert::to_boolean(&self.evaluate(*condition, ctx)?) {
                    self.evaluate(*then, ctx)
                } else {
                    let target = self.result_type(*then, ctx)?;
                    let value = self.evaluate(*otherwise, ctx)?;
                    if target == ResultType::NodeSet && value.result_type() != target {
                        return Err(Error::type_mismatch(target, value.result_type()));
                    }
                    Ok(convert::coerce(ctx.tree(), value, target))
                }
            }
            ExprKind::Let { .. } => {
                let (nested, body) = self.let_scope(id, ctx)?;
                self.evaluate(body, &nested)
            }
            ExprKind::Filter { set, predicate } => {
                let nodes = self.nodes_of(*set, ctx)?;
                self.filter(&nodes, *predicate, ctx).map(Value::NodeSet)
            }
        }
    }

    /// Evaluates a node-set expression.
    pub fn evaluate_nodes(&self, id: ExprId, ctx: &Context) -> Result<Vec<NodeId>> {
        self.expect(id, ctx, ResultType::NodeSet)?;
        Ok(self.evaluate(id, ctx)?.into_nodes())
    }

    /// Evaluates a number expression.
    pub fn evaluate_number(&self, id: ExprId, ctx: &Context) -> Result<f64> {
        self.expect(id, ctx, ResultType::Number)?;
        let value = self.evaluate(id, ctx)?;
        Ok(convert::to_number(ctx.tree(), &value))
    }

    /// Evaluates a string expression.
    pub fn evaluate_string(&self, id: ExprId, ctx: &Context) -> Result<String> {
        self.expect(id, ctx, ResultType::String)?;
        let value = self.evaluate(id, ctx)?;
        Ok(convert::to_string(ctx.tree(), &value))
    }

    /// Evaluates a boolean expression.
    pub fn evaluate_boolean(&self, id: ExprId, ctx: &Context) -> Result<bool> {
        self.expect(id, ctx, ResultType::Boolean)?;
        Ok(convert::to_boolean(&self.evaluate(id, ctx)?))
    }

    /// Pushes the nested context of a let expression and evaluates its
    /// clauses into it, in order. Returns the context and the body.
    pub fn let_scope(&self, id: ExprId, ctx: &Context) -> Result<(Context, ExprId)> {
        match self.arena.kind(id) {
            ExprKind::Let { clauses, body } => {
                let nested = ctx.nested();
                for (name, clause) in clauses {
                    let value = self.evaluate(*clause, &nested)?;
                    nested.set_variable(name.clone(), value);
                }
                Ok((nested, *body))
            }
            _ => Err(Error::invalid_operation(format!(
                "{} is not a let expression",
                self.arena.describe(id)
            ))),
        }
    }

    /// Builds the per-member contexts a filter predicate is evaluated in.
    pub fn member_contexts(&self, nodes: &[NodeId], ctx: &Context) -> Result<Vec<Context>> {
        let size = nodes.len();
        nodes
            .iter()
            .enumerate()
            .map(|(i, node)| ctx.sub(*node, i + 1, size))
            .collect()
    }

    fn filter(&self, nodes: &[NodeId], predicate: ExprId, ctx: &Context) -> Result<Vec<NodeId>> {
        let mut kept = Vec::new();
        for member in self.member_contexts(nodes, ctx)? {
            match self.evaluate(predicate, &member)? {
                Value::Number(p) if p < 1.0 => {
                    log::warn!(
                        "{}: position values begin with 1, got {}",
                        self.arena.describe(predicate),
                        p
                    );
                    return Ok(Vec::new());
                }
                Value::Number(p) => {
                    if p == member.position() as f64 {
                        kept.push(member.node());
                    }
                }
                other => {
                    if convert::to_boolean(&other) {
                        kept.push(member.node());
                    }
                }
            }
        }
        Ok(kept)
    }

    fn number_of(&self, id: ExprId, ctx: &Context) -> Result<f64> {
        let value = self.evaluate(id, ctx)?;
        Ok(convert::to_number(ctx.tree(), &value))
    }

    fn nodes_of(&self, id: ExprId, ctx: &Context) -> Result<Vec<NodeId>> {
        match self.evaluate(id, ctx)? {
            Value::NodeSet(nodes) => Ok(nodes),
            other => Err(Error::type_mismatch(ResultType::NodeSet, other.result_type())),
        }
    }

    fn expect(&self, id: ExprId, ctx: &Context, expected: ResultType) -> Result<()> {
        let got = self.result_type(id, ctx)?;
        if got != expected {
            return Err(Error::type_mismatch(expected, got));
        }
        Ok(())
    }

    #[inline]
    fn pinned(&self, id: ExprId) -> Option<&'a Value> {
        match self.placeholder {
            Some((pinned, value)) if pinned == id => Some(value),
            _ => None,
        }
    }
}
