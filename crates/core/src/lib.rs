//! Arbor Core - Core types for the arbor reactive query engine.
//!
//! This crate provides the foundational types shared by every arbor crate:
//!
//! - `Value`: Evaluation results (node-set, number, string, boolean)
//! - `ResultType`: The declared kind of an expression's result
//! - `Tree`: The tree-provider contract (reads, raw listeners, revert/restore)
//! - `Error`: Error types for evaluation and binding
//!
//! # Example
//!
//! ```rust
//! use arbor_core::{value, ResultType, Value};
//!
//! let v = Value::Number(15.0);
//! assert_eq!(v.result_type(), ResultType::Number);
//! assert_eq!(value::number_to_string(15.0), "15");
//! ```

#![no_std]

extern crate alloc;

mod error;
pub mod tree;
mod types;
pub mod value;

pub use error::{Error, Result};
pub use tree::{Checkpoint, ListenerId, NodeId, NodeListener, Reverted, Tree, TreeHandle};
pub use types::ResultType;
pub use value::Value;
