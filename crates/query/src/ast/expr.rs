//! Expression arena and the closed set of expression kinds.
//!
//! Every expression lives in an `ExpressionArena` and is addressed by
//! `ExprId`. Arguments are owned by exactly one parent; the parent link is a
//! plain index used for upward notification and carries no ownership.

use crate::path::QueryPath;
use alloc::format;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use arbor_core::{ResultType, Value};
use core::fmt;

/// Index of an expression inside its arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub usize);

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Arithmetic operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithmeticOp {
    /// Applies the operator.
    pub fn apply(&self, left: f64, right: f64) -> f64 {
        match self {
            ArithmeticOp::Add => left + right,
            ArithmeticOp::Sub => left - right,
            ArithmeticOp::Mul => left * right,
            ArithmeticOp::Div => left / right,
            ArithmeticOp::Mod => left % right,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
            ArithmeticOp::Div => "div",
            ArithmeticOp::Mod => "mod",
        }
    }
}

/// Equality and relational operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// Returns the operator with its operands swapped.
    pub fn flip(&self) -> Self {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
            other => *other,
        }
    }

    /// Returns true for `=` and `!=`.
    pub fn is_equality(&self) -> bool {
        matches!(self, CompareOp::Eq | CompareOp::Ne)
    }

    fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// Logical connectives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Expression kinds used by the core.
#[derive(Clone)]
pub enum ExprKind {
    /// Constant value.
    Literal(Value),
    /// Variable reference resolved through the context scope chain.
    Variable(String),
    /// Query path evaluated by an external path evaluator.
    Path(Rc<dyn QueryPath>),
    /// Binary numeric expression.
    Arithmetic {
        op: ArithmeticOp,
        left: ExprId,
        right: ExprId,
    },
    /// Unary minus.
    Negate(ExprId),
    /// Equality or relational comparison.
    Compare {
        op: CompareOp,
        left: ExprId,
        right: ExprId,
    },
    /// `and` / `or`.
    Logical {
        op: LogicalOp,
        left: ExprId,
        right: ExprId,
    },
    /// Number of nodes in a node-set.
    Count(ExprId),
    /// Context position.
    Position,
    /// Context size.
    Last,
    /// if / then / else.
    Conditional {
        condition: ExprId,
        then: ExprId,
        otherwise: ExprId,
    },
    /// Scoped bindings evaluated in order, then the body.
    Let {
        clauses: Vec<(String, ExprId)>,
        body: ExprId,
    },
    /// Node-set filtered by a predicate evaluated per member.
    Filter { set: ExprId, predicate: ExprId },
}

/// An expression and its parent link.
#[derive(Clone)]
pub struct ExprNode {
    /// What the expression is
    pub kind: ExprKind,
    /// Parent expression, if any
    pub parent: Option<ExprId>,
}

/// Owner of all expression nodes.
#[derive(Clone, Default)]
pub struct ExpressionArena {
    nodes: Vec<ExprNode>,
}

impl ExpressionArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of expressions.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns an expression node.
    pub fn get(&self, id: ExprId) -> Option<&ExprNode> {
        self.nodes.get(id.0)
    }

    /// Returns the kind of an expression.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not created by this arena.
    pub fn kind(&self, id: ExprId) -> &ExprKind {
        &self.nodes[id.0].kind
    }

    /// Returns the parent of an expression.
    pub fn parent(&self, id: ExprId) -> Option<ExprId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    /// Returns the arguments in declaration order (let: clauses, then body).
    pub fn arguments(&self, id: ExprId) -> Vec<ExprId> {
        match self.kind(id) {
            ExprKind::Literal(_)
            | ExprKind::Variable(_)
            | ExprKind::Path(_)
            | ExprKind::Position
            | ExprKind::Last => Vec::new(),
            ExprKind::Arithmetic { left, right, .. }
            | ExprKind::Compare { left, right, .. }
            | ExprKind::Logical { left, right, .. } => vec![*left, *right],
            ExprKind::Negate(arg) | ExprKind::Count(arg) => vec![*arg],
            ExprKind::Conditional {
                condition,
                then,
                otherwise,
            } => vec![*condition, *then, *otherwise],
            ExprKind::Let { clauses, body } => {
                let mut args: Vec<ExprId> = clauses.iter().map(|(_, c)| *c).collect();
                args.push(*body);
                args
            }
            ExprKind::Filter { set, predicate } => vec![*set, *predicate],
        }
    }

    /// Returns the declared result type when it does not depend on a context.
    ///
    /// Variables resolve through the nearest enclosing `let` clause defining
    /// them; conditional and let take the type of their then-branch / body.
    pub fn static_type(&self, id: ExprId) -> Option<ResultType> {
        match self.kind(id) {
            ExprKind::Literal(v) => Some(v.result_type()),
            ExprKind::Variable(name) => self
                .defining_clause(id, name)
                .and_then(|clause| self.static_type(clause)),
            ExprKind::Path(_) | ExprKind::Filter { .. } => Some(ResultType::NodeSet),
            ExprKind::Arithmetic { .. }
            | ExprKind::Negate(_)
            | ExprKind::Count(_)
            | ExprKind::Position
            | ExprKind::Last => Some(ResultType::Number),
            ExprKind::Compare { .. } | ExprKind::Logical { .. } => Some(ResultType::Boolean),
            ExprKind::Conditional { then, .. } => self.static_type(*then),
            ExprKind::Let { body, .. } => self.static_type(*body),
        }
    }

    /// Finds the let clause that defines `name` for the variable `id`.
    ///
    /// A clause sees only the clauses declared before it; the body sees all.
    pub fn defining_clause(&self, id: ExprId, name: &str) -> Option<ExprId> {
        let mut child = id;
        let mut current = self.parent(id);
        while let Some(parent) = current {
            if let ExprKind::Let { clauses, body } = self.kind(parent) {
                let visible = if *body == child {
                    clauses.len()
                } else {
                    clauses.iter().position(|(_, c)| *c == child).unwrap_or(0)
                };
                let defining = clauses[..visible].iter().rev().find(|(n, _)| n == name);
                if let Some((_, clause)) = defining {
                    return Some(*clause);
                }
            }
            child = parent;
            current = self.parent(parent);
        }
        None
    }

    /// Returns a short description for diagnostics.
    pub fn describe(&self, id: ExprId) -> String {
        match self.kind(id) {
            ExprKind::Literal(v) => format!("{:?}", v),
            ExprKind::Variable(name) => format!("${}", name),
            ExprKind::Path(path) => path.describe(),
            ExprKind::Arithmetic { op, left, right } => {
                format!("({} {} {})", self.describe(*left), op.symbol(), self.describe(*right))
            }
            ExprKind::Negate(arg) => format!("-{}", self.describe(*arg)),
            ExprKind::Compare { op, left, right } => {
                format!("({} {} {})", self.describe(*left), op.symbol(), self.describe(*right))
            }
            ExprKind::Logical { op, left, right } => {
                let word = match op {
                    LogicalOp::And => "and",
                    LogicalOp::Or => "or",
                };
                format!("({} {} {})", self.describe(*left), word, self.describe(*right))
            }
            ExprKind::Count(arg) => format!("count({})", self.describe(*arg)),
            ExprKind::Position => "position()".into(),
            ExprKind::Last => "last()".into(),
            ExprKind::Conditional {
                condition,
                then,
                otherwise,
            } => format!(
                "if {} then {} else {}",
                self.describe(*condition),
                self.describe(*then),
                self.describe(*otherwise)
            ),
            ExprKind::Let { clauses, body } => {
                let mut out = String::from("let");
                for (name, clause) in clauses {
                    out.push_str(&format!(" ${} := {};", name, self.describe(*clause)));
                }
                out.push_str(&format!(" return {}", self.describe(*body)));
                out
            }
            ExprKind::Filter { set, predicate } => {
                format!("{}[{}]", self.describe(*set), self.describe(*predicate))
            }
        }
    }

    // ---- builders ----

    /// Adds a literal.
    pub fn literal(&mut self, value: impl Into<Value>) -> ExprId {
        self.push(ExprKind::Literal(value.into()))
    }

    /// Adds a variable reference.
    pub fn variable(&mut self, name: impl Into<String>) -> ExprId {
        self.push(ExprKind::Variable(name.into()))
    }

    /// Adds a path expression.
    pub fn path(&mut self, path: impl QueryPath + 'static) -> ExprId {
        self.push(ExprKind::Path(Rc::new(path)))
    }

    /// Adds a path expression from a shared evaluator.
    pub fn shared_path(&mut self, path: Rc<dyn QueryPath>) -> ExprId {
        self.push(ExprKind::Path(path))
    }

    /// Adds a binary numeric expression.
    pub fn arithmetic(&mut self, op: ArithmeticOp, left: ExprId, right: ExprId) -> ExprId {
        let id = self.reserve();
        let left = self.adopt(left, id);
        let right = self.adopt(right, id);
        self.fill(id, ExprKind::Arithmetic { op, left, right })
    }

    /// Adds `left + right`.
    pub fn add(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.arithmetic(ArithmeticOp::Add, left, right)
    }

    /// Adds `left - right`.
    pub fn sub(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.arithmetic(ArithmeticOp::Sub, left, right)
    }

    /// Adds `left * right`.
    pub fn mul(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.arithmetic(ArithmeticOp::Mul, left, right)
    }

    /// Adds a unary minus.
    pub fn negate(&mut self, arg: ExprId) -> ExprId {
        let id = self.reserve();
        let arg = self.adopt(arg, id);
        self.fill(id, ExprKind::Negate(arg))
    }

    /// Adds a comparison.
    pub fn compare(&mut self, op: CompareOp, left: ExprId, right: ExprId) -> ExprId {
        let id = self.reserve();
        let left = self.adopt(left, id);
        let right = self.adopt(right, id);
        self.fill(id, ExprKind::Compare { op, left, right })
    }

    /// Adds `left = right`.
    pub fn eq(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.compare(CompareOp::Eq, left, right)
    }

    /// Adds `left != right`.
    pub fn ne(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.compare(CompareOp::Ne, left, right)
    }

    /// Adds `left < right`.
    pub fn lt(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.compare(CompareOp::Lt, left, right)
    }

    /// Adds `left > right`.
    pub fn gt(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.compare(CompareOp::Gt, left, right)
    }

    /// Adds a logical connective.
    pub fn logical(&mut self, op: LogicalOp, left: ExprId, right: ExprId) -> ExprId {
        let id = self.reserve();
        let left = self.adopt(left, id);
        let right = self.adopt(right, id);
        self.fill(id, ExprKind::Logical { op, left, right })
    }

    /// Adds `count(arg)`.
    pub fn count(&mut self, arg: ExprId) -> ExprId {
        let id = self.reserve();
        let arg = self.adopt(arg, id);
        self.fill(id, ExprKind::Count(arg))
    }

    /// Adds `position()`.
    pub fn position(&mut self) -> ExprId {
        self.push(ExprKind::Position)
    }

    /// Adds `last()`.
    pub fn last(&mut self) -> ExprId {
        self.push(ExprKind::Last)
    }

    /// Adds `if condition then then else otherwise`.
    pub fn conditional(&mut self, condition: ExprId, then: ExprId, otherwise: ExprId) -> ExprId {
        let id = self.reserve();
        let condition = self.adopt(condition, id);
        let then = self.adopt(then, id);
        let otherwise = self.adopt(otherwise, id);
        self.fill(
            id,
            ExprKind::Conditional {
                condition,
                then,
                otherwise,
            },
        )
    }

    /// Adds a let expression; clauses are evaluated in the given order.
    pub fn let_in<N: Into<String>>(&mut self, clauses: Vec<(N, ExprId)>, body: ExprId) -> ExprId {
        let id = self.reserve();
        let clauses = clauses
            .into_iter()
            .map(|(name, clause)| (name.into(), self.adopt(clause, id)))
            .collect();
        let body = self.adopt(body, id);
        self.fill(id, ExprKind::Let { clauses, body })
    }

    /// Adds `set[predicate]`.
    pub fn filter(&mut self, set: ExprId, predicate: ExprId) -> ExprId {
        let id = self.reserve();
        let set = self.adopt(set, id);
        let predicate = self.adopt(predicate, id);
        self.fill(id, ExprKind::Filter { set, predicate })
    }

    /// Deep-copies an expression subtree; the copy has no parent.
    pub fn clone_subtree(&mut self, id: ExprId) -> ExprId {
        let copy = self.reserve();
        let kind = match self.kind(id).clone() {
            ExprKind::Arithmetic { op, left, right } => ExprKind::Arithmetic {
                op,
                left: self.copy_child(left, copy),
                right: self.copy_child(right, copy),
            },
            ExprKind::Negate(arg) => ExprKind::Negate(self.copy_child(arg, copy)),
            ExprKind::Compare { op, left, right } => ExprKind::Compare {
                op,
                left: self.copy_child(left, copy),
                right: self.copy_child(right, copy),
            },
            ExprKind::Logical { op, left, right } => ExprKind::Logical {
                op,
                left: self.copy_child(left, copy),
                right: self.copy_child(right, copy),
            },
            ExprKind::Count(arg) => ExprKind::Count(self.copy_child(arg, copy)),
            ExprKind::Conditional {
                condition,
                then,
                otherwise,
            } => ExprKind::Conditional {
                condition: self.copy_child(condition, copy),
                then: self.copy_child(then, copy),
                otherwise: self.copy_child(otherwise, copy),
            },
            ExprKind::Let { clauses, body } => ExprKind::Let {
                clauses: clauses
                    .into_iter()
                    .map(|(name, clause)| (name, self.copy_child(clause, copy)))
                    .collect(),
                body: self.copy_child(body, copy),
            },
            ExprKind::Filter { set, predicate } => ExprKind::Filter {
                set: self.copy_child(set, copy),
                predicate: self.copy_child(predicate, copy),
            },
            leaf => leaf,
        };
        self.fill(copy, kind)
    }

    fn copy_child(&mut self, child: ExprId, parent: ExprId) -> ExprId {
        let copy = self.clone_subtree(child);
        self.nodes[copy.0].parent = Some(parent);
        copy
    }

    fn push(&mut self, kind: ExprKind) -> ExprId {
        self.nodes.push(ExprNode { kind, parent: None });
        ExprId(self.nodes.len() - 1)
    }

    fn reserve(&mut self) -> ExprId {
        self.push(ExprKind::Position)
    }

    fn fill(&mut self, id: ExprId, kind: ExprKind) -> ExprId {
        self.nodes[id.0].kind = kind;
        id
    }

    /// Makes `parent` the owner of `arg`, cloning `arg` if it is already owned.
    fn adopt(&mut self, arg: ExprId, parent: ExprId) -> ExprId {
        let arg = if self.nodes[arg.0].parent.is_some() {
            self.clone_subtree(arg)
        } else {
            arg
        };
        self.nodes[arg.0].parent = Some(parent);
        arg
    }
}

impl fmt::Debug for ExpressionArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpressionArena")
            .field("len", &self.nodes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_set_parent() {
        let mut arena = ExpressionArena::new();
        let a = arena.literal(2.0);
        let b = arena.literal(3.0);
        let sum = arena.add(a, b);

        assert_eq!(arena.parent(a), Some(sum));
        assert_eq!(arena.parent(b), Some(sum));
        assert_eq!(arena.parent(sum), None);
        assert_eq!(arena.arguments(sum), vec![a, b]);
        assert_eq!(arena.static_type(sum), Some(ResultType::Number));
    }

    #[test]
    fn test_shared_argument_is_cloned() {
        let mut arena = ExpressionArena::new();
        let a = arena.literal(1.0);
        let first = arena.negate(a);
        let second = arena.negate(a);

        let cloned = arena.arguments(second)[0];
        assert_ne!(cloned, a);
        assert_eq!(arena.parent(a), Some(first));
        assert_eq!(arena.parent(cloned), Some(second));
    }

    #[test]
    fn test_static_types() {
        let mut arena = ExpressionArena::new();
        let s = arena.literal("x");
        let n = arena.literal(1.0);
        let cond_arg = arena.literal(true);
        let cond = arena.conditional(cond_arg, s, n);
        assert_eq!(arena.static_type(cond), Some(ResultType::String));

        let left = arena.literal(1.0);
        let right = arena.literal(2.0);
        let cmp = arena.lt(left, right);
        assert_eq!(arena.static_type(cmp), Some(ResultType::Boolean));
    }

    #[test]
    fn test_variable_resolves_through_let() {
        let mut arena = ExpressionArena::new();
        let x_value = arena.literal("hello");
        let x_ref = arena.variable("x");
        let y_ref_body = arena.variable("y");
        let body = arena.conditional(x_ref, y_ref_body, y_ref_body);
        let y_clause = arena.literal(4.0);
        let expr = arena.let_in(vec![("x", x_value), ("y", y_clause)], body);

        assert_eq!(arena.static_type(expr), Some(ResultType::Number));
        assert_eq!(arena.defining_clause(x_ref, "x"), Some(x_value));

        let free = arena.variable("free");
        assert_eq!(arena.static_type(free), None);
    }

    #[test]
    fn test_describe() {
        let mut arena = ExpressionArena::new();
        let a = arena.literal(2.0);
        let b = arena.variable("b");
        let sum = arena.add(a, b);
        assert_eq!(arena.describe(sum), "(Number(2.0) + $b)");
    }
}
