//! Leaf value bridge.
//!
//! A `LeafValueListener` sits on a node reached by a bound path expression
//! and turns bare value mutations of that node into expression-level value
//! notifications. A dirty (lazily synced) node is read as soon as it is
//! marked, which forces the sync and produces an ordinary value mutation.

use alloc::rc::Weak;
use alloc::vec::Vec;
use arbor_core::{ListenerId, NodeId, NodeListener};
use arbor_query::{Context, ExprId};
use hashbrown::HashMap;

/// Receives the value changes seen by leaf listeners.
pub trait LeafValueSink {
    /// The value of `node`, reached by `expr` in `ctx`, changed.
    fn leaf_value(
        &self,
        expr: ExprId,
        ctx: &Context,
        node: NodeId,
        new: Option<&str>,
        old: Option<&str>,
    );
}

/// Raw node listener bridging value mutations to a `LeafValueSink`.
pub struct LeafValueListener {
    sink: Weak<dyn LeafValueSink>,
    expr: ExprId,
    ctx: Context,
}

impl LeafValueListener {
    /// Creates a bridge for `expr` bound in `ctx`.
    pub fn new(sink: Weak<dyn LeafValueSink>, expr: ExprId, ctx: Context) -> Self {
        Self { sink, expr, ctx }
    }

    /// Returns the owning expression.
    pub fn expr(&self) -> ExprId {
        self.expr
    }

    /// Returns the context the expression is bound in.
    pub fn context(&self) -> &Context {
        &self.ctx
    }
}

impl NodeListener for LeafValueListener {
    fn notify_value(&self, node: NodeId, new: Option<&str>, old: Option<&str>) {
        if let Some(sink) = self.sink.upgrade() {
            sink.leaf_value(self.expr, &self.ctx, node, new, old);
        }
    }

    fn notify_dirty(&self, node: NodeId) {
        log::debug!("forcing sync of dirty {}", node);
        let _ = self.ctx.tree().value(node);
    }
}

/// Installed leaf listeners, by node and owning expression.
#[derive(Debug, Default)]
pub struct LeafValueRegistry {
    entries: HashMap<(NodeId, ExprId), Vec<(Context, ListenerId)>>,
}

impl LeafValueRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks a listener up by node, expression and context.
    pub fn get(&self, node: NodeId, expr: ExprId, ctx: &Context) -> Option<ListenerId> {
        self.entries
            .get(&(node, expr))?
            .iter()
            .find(|(c, _)| c.ptr_eq(ctx) || c == ctx)
            .map(|(_, id)| *id)
    }

    /// Returns every context `expr` reaches `node` in.
    pub fn contexts(&self, node: NodeId, expr: ExprId) -> Vec<Context> {
        self.entries
            .get(&(node, expr))
            .map(|list| list.iter().map(|(c, _)| c.clone()).collect())
            .unwrap_or_default()
    }

    /// Records an installed listener. Returns false for a duplicate.
    pub fn insert(&mut self, node: NodeId, expr: ExprId, ctx: Context, id: ListenerId) -> bool {
        if self.get(node, expr, &ctx).is_some() {
            return false;
        }
        self.entries.entry((node, expr)).or_default().push((ctx, id));
        true
    }

    /// Forgets one listener, returning its id.
    pub fn remove(&mut self, node: NodeId, expr: ExprId, ctx: &Context) -> Option<ListenerId> {
        let list = self.entries.get_mut(&(node, expr))?;
        let index = list.iter().position(|(c, _)| c.ptr_eq(ctx) || c == ctx)?;
        let (_, id) = list.remove(index);
        if list.is_empty() {
            self.entries.remove(&(node, expr));
        }
        Some(id)
    }

    /// Forgets every listener of `expr` in `ctx`, returning node and id pairs.
    pub fn remove_all(&mut self, expr: ExprId, ctx: &Context) -> Vec<(NodeId, ListenerId)> {
        let nodes: Vec<NodeId> = self
            .entries
            .keys()
            .filter(|(_, e)| *e == expr)
            .map(|(n, _)| *n)
            .collect();
        nodes
            .into_iter()
            .filter_map(|node| self.remove(node, expr, ctx).map(|id| (node, id)))
            .collect()
    }

    /// Returns the number of installed listeners.
    pub fn len(&self) -> usize {
        self.entries.values().map(|l| l.len()).sum()
    }

    /// Returns true if nothing is installed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
