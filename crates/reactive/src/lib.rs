//! Arbor Reactive - Incremental notifications for arbor expressions.
//!
//! This crate keeps bound expressions up to date as the tree mutates:
//!
//! - `ExpressionListener`: The callbacks delivering insert, remove, scalar,
//!   opaque and leaf value changes
//! - `FanOutListener`: Per-context listener sets with fault isolation
//! - `LeafValueListener`: Bridges value mutations of result nodes
//! - `notifier`: Counterfactual replay for scalar expressions and exact
//!   insert/remove deltas for node-sets
//! - `Engine`: Binding, rebinding and change propagation
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use arbor_core::{Result, Tree};
//! use arbor_query::{ChildPath, Context, ExprId};
//! use arbor_reactive::{Engine, ExpressionListener};
//! use arbor_storage::MemoryTree;
//!
//! #[derive(Default)]
//! struct Totals(RefCell<Vec<f64>>);
//!
//! impl ExpressionListener for Totals {
//!     fn notify_change_number(&self, _: ExprId, _: &Context, new: f64, _old: f64) -> Result<()> {
//!         self.0.borrow_mut().push(new);
//!         Ok(())
//!     }
//! }
//!
//! let tree = MemoryTree::new("cart");
//! let engine = Engine::new(tree.handle());
//! let total = engine.build(|a| {
//!     let items = a.path("item".parse::<ChildPath>().unwrap());
//!     a.count(items)
//! });
//!
//! let totals = Rc::new(Totals::default());
//! engine
//!     .add_notify_listener(total, &engine.root_context(), totals.clone())
//!     .unwrap();
//! tree.append(tree.root(), "item", None).unwrap();
//! assert_eq!(*totals.0.borrow(), vec![0.0, 1.0]);
//! ```

#![no_std]

extern crate alloc;

mod engine;
mod fanout;
mod leaf;
mod listener;
pub mod notifier;

pub use engine::Engine;
pub use fanout::FanOutListener;
pub use leaf::{LeafValueListener, LeafValueRegistry, LeafValueSink};
pub use listener::{ExpressionListener, Notification};
