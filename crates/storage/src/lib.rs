//! Arbor Storage - In-memory tree provider for arbor.
//!
//! This crate provides the reference implementation of the `Tree` contract:
//!
//! - `MemoryTree`: Shared node storage with raw mutation listeners
//! - `Journal`: Undo/redo record of the most recent mutation, backing revert/restore
//!
//! # Example
//!
//! ```rust
//! use arbor_core::Tree;
//! use arbor_storage::MemoryTree;
//!
//! let tree = MemoryTree::new("root");
//! let a = tree.append(tree.root(), "a", Some("2")).unwrap();
//! tree.set_value(a, Some("5")).unwrap();
//!
//! tree.revert().unwrap();
//! assert_eq!(tree.value(a).as_deref(), Some("2"));
//! tree.restore().unwrap();
//! assert_eq!(tree.value(a).as_deref(), Some("5"));
//! ```

#![no_std]

extern crate alloc;

pub mod journal;
pub mod tree;

pub use journal::{Journal, JournalEntry, NodeData};
pub use tree::{MemoryTree, ValueLoader};
