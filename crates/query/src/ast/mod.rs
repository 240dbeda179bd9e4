//! AST module for query expressions.

mod expr;

pub use expr::{ArithmeticOp, CompareOp, ExprId, ExprKind, ExprNode, ExpressionArena, LogicalOp};
