//! Arbor Diff - Ordered-sequence diff for arbor.
//!
//! This crate turns two snapshots of an ordered sequence into a minimal
//! stream of equal / remove / insert runs. The reactive engine uses it to
//! convert a before/after pair of node-sets into positioned notifications.
//!
//! # Core Concepts
//!
//! - `SequenceDiffer`: The diff algorithm, parameterized by a `Matcher`
//! - `DiffHandler`: Callbacks receiving each run as it is found
//! - `Change`: A positioned insert or remove record
//! - `apply_changes`: Replays changes against the left sequence
//!
//! # Example
//!
//! ```rust
//! use arbor_diff::{apply_changes, SequenceDiffer};
//!
//! let left = vec!['a', 'b', 'c'];
//! let right = vec!['a', 'c', 'd'];
//!
//! let changes = SequenceDiffer::new().changes(&left, &right);
//! let mut replay = left.clone();
//! apply_changes(&mut replay, &right, &changes);
//! assert_eq!(replay, right);
//! ```

#![no_std]

extern crate alloc;

pub mod change;
pub mod differ;

pub use change::{apply_changes, Change, ChangeCollector};
pub use differ::{DiffHandler, Matcher, SequenceDiffer, ValueEq};
