//! Arbor Query - Expressions and evaluation for the arbor reactive query engine.
//!
//! This crate provides the evaluation side of the engine:
//!
//! - `ast`: The expression arena and the closed set of expression kinds
//! - `context`: Evaluation contexts, variable scopes and update sequencing
//! - `eval`: The evaluator with its typed entry points, conversions and comparison
//! - `path`: The query-path contract and the child-axis reference evaluator
//!
//! # Example
//!
//! ```rust
//! use arbor_core::Tree;
//! use arbor_query::{ChildPath, Context, Evaluator, ExpressionArena};
//! use arbor_storage::MemoryTree;
//!
//! let tree = MemoryTree::new("root");
//! tree.append(tree.root(), "item", Some("2")).unwrap();
//! tree.append(tree.root(), "item", Some("3")).unwrap();
//!
//! let mut arena = ExpressionArena::new();
//! let items = arena.path("item".parse::<ChildPath>().unwrap());
//! let count = arena.count(items);
//! let ten = arena.literal(10.0);
//! let expr = arena.add(count, ten);
//!
//! let ctx = Context::root(tree.handle(), tree.root());
//! let eval = Evaluator::new(&arena);
//! assert_eq!(eval.evaluate_number(expr, &ctx).unwrap(), 12.0);
//! ```

#![no_std]

extern crate alloc;

pub mod ast;
pub mod context;
pub mod eval;
pub mod path;

pub use ast::{ArithmeticOp, CompareOp, ExprId, ExprKind, ExprNode, ExpressionArena, LogicalOp};
pub use context::{Context, UpdateKey, UpdateTracker, VariableScope};
pub use eval::Evaluator;
pub use path::{ChildPath, PathListener, QueryPath, Step};
