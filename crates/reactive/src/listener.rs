//! Expression listener protocol.
//!
//! Listeners receive one of seven notification shapes for an expression
//! bound in a context. Every callback may fail; a failure is routed to the
//! same listener's `handle_fault` and never reaches its peers.

use alloc::string::String;
use alloc::vec::Vec;
use arbor_core::{Error, NodeId, Result};
use arbor_query::{Context, ExprId};

/// Receives incremental changes of a bound expression.
pub trait ExpressionListener {
    /// `count` nodes were inserted at `start`; `nodes` is the node-set after
    /// the insertion.
    fn notify_insert(
        &self,
        _expr: ExprId,
        _ctx: &Context,
        _nodes: &[NodeId],
        _start: usize,
        _count: usize,
    ) -> Result<()> {
        Ok(())
    }

    /// `count` nodes are removed at `start`; `nodes` is the node-set before
    /// the removal.
    fn notify_remove(
        &self,
        _expr: ExprId,
        _ctx: &Context,
        _nodes: &[NodeId],
        _start: usize,
        _count: usize,
    ) -> Result<()> {
        Ok(())
    }

    /// A boolean result flipped to `new`.
    fn notify_change_boolean(&self, _expr: ExprId, _ctx: &Context, _new: bool) -> Result<()> {
        Ok(())
    }

    /// A number result changed.
    fn notify_change_number(
        &self,
        _expr: ExprId,
        _ctx: &Context,
        _new: f64,
        _old: f64,
    ) -> Result<()> {
        Ok(())
    }

    /// A string result changed.
    fn notify_change_string(
        &self,
        _expr: ExprId,
        _ctx: &Context,
        _new: &str,
        _old: &str,
    ) -> Result<()> {
        Ok(())
    }

    /// The result changed in a way that needs full re-evaluation.
    fn notify_change(&self, _expr: ExprId, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    /// The value of `node`, a member of the result, changed.
    ///
    /// Only delivered when `requires_value_notification` returns true.
    fn notify_value(
        &self,
        _expr: ExprId,
        _contexts: &[Context],
        _node: NodeId,
        _new: Option<&str>,
        _old: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    /// Returns true if this listener wants leaf value notifications.
    fn requires_value_notification(&self) -> bool {
        false
    }

    /// Receives a failure raised while notifying this listener or while
    /// computing a delta on its behalf.
    fn handle_fault(&self, expr: ExprId, ctx: &Context, error: &Error) {
        log::warn!("listener fault for {} in {:?}: {}", expr, ctx, error);
    }
}

/// One notification, in any of the seven shapes.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    /// Nodes inserted; `nodes` is the set after the insertion
    Insert {
        nodes: Vec<NodeId>,
        start: usize,
        count: usize,
    },
    /// Nodes removed; `nodes` is the set before the removal
    Remove {
        nodes: Vec<NodeId>,
        start: usize,
        count: usize,
    },
    /// Boolean result flipped
    Boolean(bool),
    /// Number result changed
    Number { new: f64, old: f64 },
    /// String result changed
    String { new: String, old: String },
    /// Opaque change
    Opaque,
    /// Leaf value of a result node changed
    Value {
        contexts: Vec<Context>,
        node: NodeId,
        new: Option<String>,
        old: Option<String>,
    },
}

impl Notification {
    /// Returns true for leaf value notifications.
    #[inline]
    pub fn is_value(&self) -> bool {
        matches!(self, Notification::Value { .. })
    }

    /// Calls the matching callback of `listener`.
    pub fn deliver(
        &self,
        listener: &dyn ExpressionListener,
        expr: ExprId,
        ctx: &Context,
    ) -> Result<()> {
        match self {
            Notification::Insert {
                nodes,
                start,
                count,
            } => listener.notify_insert(expr, ctx, nodes, *start, *count),
            Notification::Remove {
                nodes,
                start,
                count,
            } => listener.notify_remove(expr, ctx, nodes, *start, *count),
            Notification::Boolean(new) => listener.notify_change_boolean(expr, ctx, *new),
            Notification::Number { new, old } => {
                listener.notify_change_number(expr, ctx, *new, *old)
            }
            Notification::String { new, old } => listener.notify_change_string(expr, ctx, new, old),
            Notification::Opaque => listener.notify_change(expr, ctx),
            Notification::Value {
                contexts,
                node,
                new,
                old,
            } => listener.notify_value(expr, contexts, *node, new.as_deref(), old.as_deref()),
        }
    }
}
