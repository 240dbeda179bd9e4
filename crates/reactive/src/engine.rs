//! The notification engine.
//!
//! `Engine` owns the expression arena and the live bindings of its
//! expressions. A binding installs path listeners and leaf value listeners
//! on the tree; when the tree mutates, the affected expression computes its
//! own delta, hands it to its listeners and passes the change on to its
//! parent, which does the same, up to the expression the caller bound.
//!
//! Conditional, let and filter expressions rebind part of their subtree
//! when a change alters which branch, which clause values or which filter
//! members are live: the old part is unbound against the reverted tree, the
//! new part bound against the restored tree, before anything is reported.
//!
//! Failures while computing a delta are logged, handed to the
//! `handle_fault` of the listeners along the expression chain, and the
//! delta is dropped. They never unwind into the tree or into peers.

use crate::fanout::FanOutListener;
use crate::leaf::{LeafValueListener, LeafValueRegistry, LeafValueSink};
use crate::listener::{ExpressionListener, Notification};
use crate::notifier::{self, counterfactual};
use alloc::format;
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use arbor_core::{Error, NodeId, Result, ResultType, Reverted, Tree, TreeHandle, Value};
use arbor_query::eval::convert;
use arbor_query::{Context, Evaluator, ExprId, ExprKind, ExpressionArena, PathListener};
use core::cell::RefCell;
use hashbrown::HashMap;

/// What a binding installed.
enum Installed {
    /// Nothing: literals, variables, position and last
    Nothing,
    /// A path listener; leaf listeners live in the registry
    Path(Rc<dyn PathListener>),
    /// Arguments bound in the same context
    Arguments,
    /// Condition plus the branch currently taken
    Conditional { branch: ExprId },
    /// Clauses and body bound in a nested context
    Let { nested: Context },
    /// Set bound in the context, predicate bound in each member context
    Filter { members: Vec<Context> },
}

struct Binding {
    ctx: Context,
    installed: Installed,
    /// True if the parent expression created this binding
    owned: bool,
}

/// How a child's result changed, as seen by its parent.
enum ChildChange {
    /// A scalar result moved from `old` to `new`
    Scalar { old: Value, new: Value },
    /// A node-set result moved from `old` to `new`; `values` is set when
    /// member values may have changed too
    Nodes {
        old: Vec<NodeId>,
        new: Vec<NodeId>,
        values: bool,
    },
    /// The result kind changed
    Structural,
}

impl ChildChange {
    fn between(old: &Value, new: &Value, values: bool) -> Self {
        match (old, new) {
            (Value::NodeSet(old), Value::NodeSet(new)) => ChildChange::Nodes {
                old: old.clone(),
                new: new.clone(),
                values,
            },
            _ if old.result_type() == new.result_type() => ChildChange::Scalar {
                old: old.clone(),
                new: new.clone(),
            },
            _ => ChildChange::Structural,
        }
    }

    /// Returns the old and new values the child can be pinned to.
    fn pinned(&self) -> Option<(Value, Value)> {
        match self {
            ChildChange::Scalar { old, new } => Some((old.clone(), new.clone())),
            ChildChange::Nodes { old, new, .. } => {
                Some((Value::NodeSet(old.clone()), Value::NodeSet(new.clone())))
            }
            ChildChange::Structural => None,
        }
    }

    /// Returns true if member values of a node-set may have changed.
    fn touches_values(&self) -> bool {
        match self {
            ChildChange::Nodes { values, .. } => *values,
            ChildChange::Scalar { .. } => false,
            ChildChange::Structural => true,
        }
    }
}

struct EngineState {
    this: Weak<EngineState>,
    tree: TreeHandle,
    arena: RefCell<Rc<ExpressionArena>>,
    bindings: RefCell<HashMap<ExprId, Vec<Binding>>>,
    listeners: RefCell<HashMap<ExprId, Rc<FanOutListener>>>,
    leaves: RefCell<LeafValueRegistry>,
}

/// Binds expressions to a tree and delivers their incremental changes.
///
/// Cloning is cheap and shares the same engine.
#[derive(Clone)]
pub struct Engine {
    state: Rc<EngineState>,
}

impl Engine {
    /// Creates an engine with an empty arena.
    pub fn new(tree: TreeHandle) -> Self {
        Self::with_arena(tree, ExpressionArena::new())
    }

    /// Creates an engine over an existing arena.
    pub fn with_arena(tree: TreeHandle, arena: ExpressionArena) -> Self {
        Self {
            state: Rc::new_cyclic(|this| EngineState {
                this: this.clone(),
                tree,
                arena: RefCell::new(Rc::new(arena)),
                bindings: RefCell::new(HashMap::new()),
                listeners: RefCell::new(HashMap::new()),
                leaves: RefCell::new(LeafValueRegistry::new()),
            }),
        }
    }

    /// Adds expressions to the arena.
    ///
    /// Evaluations in progress keep the arena they started with.
    pub fn build<R>(&self, f: impl FnOnce(&mut ExpressionArena) -> R) -> R {
        let mut arena = self.state.arena.borrow_mut();
        f(Rc::make_mut(&mut arena))
    }

    /// Returns a snapshot of the arena.
    pub fn arena(&self) -> Rc<ExpressionArena> {
        self.state.arena()
    }

    /// Returns the tree.
    pub fn tree(&self) -> &dyn Tree {
        &*self.state.tree
    }

    /// Returns a root context on the tree root.
    pub fn root_context(&self) -> Context {
        Context::root(self.state.tree.clone(), self.state.tree.root())
    }

    /// Binds `expr` in `ctx`. Binding twice without unbinding is an error.
    pub fn bind(&self, expr: ExprId, ctx: &Context) -> Result<()> {
        let arena = self.state.arena_for(expr)?;
        self.state.bind(&arena, expr, ctx, false)
    }

    /// Unbinds `expr` from `ctx`.
    pub fn unbind(&self, expr: ExprId, ctx: &Context) -> Result<()> {
        let arena = self.state.arena_for(expr)?;
        self.state.unbind(&arena, expr, ctx)
    }

    /// Returns true if `expr` is bound in `ctx`.
    pub fn is_bound(&self, expr: ExprId, ctx: &Context) -> bool {
        self.state.binding_index(expr, ctx).is_some()
    }

    /// Returns the number of live bindings, including those of subexpressions.
    pub fn binding_count(&self) -> usize {
        self.state.bindings.borrow().values().map(|b| b.len()).sum()
    }

    /// Returns the number of installed leaf value listeners.
    pub fn leaf_listener_count(&self) -> usize {
        self.state.leaves.borrow().len()
    }

    /// Registers `listener` for `expr` in `ctx`. Returns false if it was
    /// already registered.
    pub fn add_listener(
        &self,
        expr: ExprId,
        ctx: &Context,
        listener: Rc<dyn ExpressionListener>,
    ) -> bool {
        let fan = self
            .state
            .listeners
            .borrow_mut()
            .entry(expr)
            .or_insert_with(|| Rc::new(FanOutListener::new()))
            .clone();
        fan.add(ctx, listener)
    }

    /// Unregisters `listener`. Returns false if it was not registered.
    pub fn remove_listener(
        &self,
        expr: ExprId,
        ctx: &Context,
        listener: &Rc<dyn ExpressionListener>,
    ) -> bool {
        let Some(fan) = self.state.fan_out(expr) else {
            return false;
        };
        let removed = fan.remove(ctx, listener);
        if fan.is_empty() {
            self.state.listeners.borrow_mut().remove(&expr);
        }
        removed
    }

    /// Binds `expr` in `ctx` if needed, registers `listener` and delivers the
    /// current value to it: a node-set as one insert from the empty set, a
    /// scalar as a change from the type default.
    pub fn add_notify_listener(
        &self,
        expr: ExprId,
        ctx: &Context,
        listener: Rc<dyn ExpressionListener>,
    ) -> Result<()> {
        if !self.is_bound(expr, ctx) {
            self.bind(expr, ctx)?;
        }
        self.add_listener(expr, ctx, listener.clone());
        let value = self.evaluate(expr, ctx)?;
        for notification in notifier::initial_notifications(&value) {
            notification.deliver(&*listener, expr, ctx)?;
        }
        Ok(())
    }

    /// Returns true if some listener of `expr` wants leaf value notifications.
    pub fn requires_value_notification(&self, expr: ExprId) -> bool {
        self.state
            .fan_out(expr)
            .map(|fan| fan.requires_value_notification())
            .unwrap_or(false)
    }

    /// Evaluates `expr` in `ctx`.
    pub fn evaluate(&self, expr: ExprId, ctx: &Context) -> Result<Value> {
        Evaluator::new(&*self.state.arena_for(expr)?).evaluate(expr, ctx)
    }

    /// Evaluates a node-set expression.
    pub fn evaluate_nodes(&self, expr: ExprId, ctx: &Context) -> Result<Vec<NodeId>> {
        Evaluator::new(&*self.state.arena_for(expr)?).evaluate_nodes(expr, ctx)
    }

    /// Evaluates a number expression.
    pub fn evaluate_number(&self, expr: ExprId, ctx: &Context) -> Result<f64> {
        Evaluator::new(&*self.state.arena_for(expr)?).evaluate_number(expr, ctx)
    }

    /// Evaluates a string expression.
    pub fn evaluate_string(&self, expr: ExprId, ctx: &Context) -> Result<String> {
        Evaluator::new(&*self.state.arena_for(expr)?).evaluate_string(expr, ctx)
    }

    /// Evaluates a boolean expression.
    pub fn evaluate_boolean(&self, expr: ExprId, ctx: &Context) -> Result<bool> {
        Evaluator::new(&*self.state.arena_for(expr)?).evaluate_boolean(expr, ctx)
    }
}

impl core::fmt::Debug for Engine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("expressions", &self.state.arena().len())
            .field("bindings", &self.binding_count())
            .field("leaf_listeners", &self.leaf_listener_count())
            .finish()
    }
}

impl EngineState {
    fn arena(&self) -> Rc<ExpressionArena> {
        self.arena.borrow().clone()
    }

    /// Returns the arena, or an error if `expr` does not belong to it.
    fn arena_for(&self, expr: ExprId) -> Result<Rc<ExpressionArena>> {
        let arena = self.arena();
        if arena.get(expr).is_none() {
            return Err(Error::invalid_operation(format!(
                "{} is not an expression of this engine",
                expr
            )));
        }
        Ok(arena)
    }

    fn fan_out(&self, expr: ExprId) -> Option<Rc<FanOutListener>> {
        self.listeners.borrow().get(&expr).cloned()
    }

    fn binding_index(&self, expr: ExprId, ctx: &Context) -> Option<usize> {
        let bindings = self.bindings.borrow();
        let list = bindings.get(&expr)?;
        list.iter()
            .position(|b| b.ctx.ptr_eq(ctx))
            .or_else(|| list.iter().position(|b| b.ctx == *ctx))
    }

    fn is_owned(&self, expr: ExprId, ctx: &Context) -> Option<bool> {
        let index = self.binding_index(expr, ctx)?;
        Some(self.bindings.borrow()[&expr][index].owned)
    }

    // ---- bind / unbind ----

    fn bind(
        &self,
        arena: &ExpressionArena,
        expr: ExprId,
        ctx: &Context,
        owned: bool,
    ) -> Result<()> {
        if self.binding_index(expr, ctx).is_some() {
            return Err(Error::invalid_operation(format!(
                "{} is already bound in {:?}",
                arena.describe(expr),
                ctx
            )));
        }
        let installed = self.install(arena, expr, ctx)?;
        log::debug!("bound {} at {}", arena.describe(expr), ctx.node());
        self.bindings.borrow_mut().entry(expr).or_default().push(Binding {
            ctx: ctx.clone(),
            installed,
            owned,
        });
        Ok(())
    }

    fn install(&self, arena: &ExpressionArena, expr: ExprId, ctx: &Context) -> Result<Installed> {
        let eval = Evaluator::new(arena);
        match arena.kind(expr) {
            ExprKind::Literal(_) | ExprKind::Variable(_) | ExprKind::Position | ExprKind::Last => {
                Ok(Installed::Nothing)
            }
            ExprKind::Path(path) => {
                let bridge: Rc<dyn PathListener> = Rc::new(PathBridge {
                    engine: self.this.clone(),
                    expr,
                });
                path.bind(ctx, bridge.clone())?;
                match path.evaluate(ctx) {
                    Ok(nodes) => {
                        for node in nodes {
                            self.install_leaf(expr, ctx, node);
                        }
                        Ok(Installed::Path(bridge))
                    }
                    Err(e) => {
                        let _ = path.unbind(ctx, &bridge);
                        Err(e)
                    }
                }
            }
            ExprKind::Arithmetic { .. }
            | ExprKind::Negate(_)
            | ExprKind::Compare { .. }
            | ExprKind::Logical { .. }
            | ExprKind::Count(_) => {
                let args: Vec<(ExprId, Context)> = arena
                    .arguments(expr)
                    .into_iter()
                    .map(|arg| (arg, ctx.clone()))
                    .collect();
                self.bind_all(arena, &args)?;
                Ok(Installed::Arguments)
            }
            ExprKind::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let then_type = eval.result_type(*then, ctx)?;
                let else_type = eval.result_type(*otherwise, ctx)?;
                if then_type == ResultType::NodeSet && else_type != ResultType::NodeSet {
                    return Err(Error::type_mismatch(then_type, else_type));
                }
                let branch = self.taken_branch(arena, expr, ctx)?;
                self.bind_all(arena, &[(*condition, ctx.clone()), (branch, ctx.clone())])?;
                Ok(Installed::Conditional { branch })
            }
            ExprKind::Let { .. } => {
                let nested = self.bind_let_scope(arena, expr, ctx)?;
                Ok(Installed::Let { nested })
            }
            ExprKind::Filter { set, predicate } => {
                self.bind(arena, *set, ctx, true)?;
                match self.bind_members(arena, *set, *predicate, ctx) {
                    Ok(members) => Ok(Installed::Filter { members }),
                    Err(e) => {
                        let _ = self.unbind(arena, *set, ctx);
                        Err(e)
                    }
                }
            }
        }
    }

    /// Binds every `(expr, ctx)` pair, undoing the earlier ones on failure.
    fn bind_all(&self, arena: &ExpressionArena, targets: &[(ExprId, Context)]) -> Result<()> {
        for (i, (expr, ctx)) in targets.iter().enumerate() {
            if let Err(e) = self.bind(arena, *expr, ctx, true) {
                for (done, done_ctx) in &targets[..i] {
                    let _ = self.unbind(arena, *done, done_ctx);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn unbind_all(&self, arena: &ExpressionArena, targets: &[(ExprId, Context)]) -> Result<()> {
        let mut first_error = None;
        for (expr, ctx) in targets {
            if let Err(e) = self.unbind(arena, *expr, ctx) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn bind_let_scope(
        &self,
        arena: &ExpressionArena,
        expr: ExprId,
        ctx: &Context,
    ) -> Result<Context> {
        let (nested, _) = Evaluator::new(arena).let_scope(expr, ctx)?;
        let targets: Vec<(ExprId, Context)> = arena
            .arguments(expr)
            .into_iter()
            .map(|arg| (arg, nested.clone()))
            .collect();
        self.bind_all(arena, &targets)?;
        Ok(nested)
    }

    fn bind_members(
        &self,
        arena: &ExpressionArena,
        set: ExprId,
        predicate: ExprId,
        ctx: &Context,
    ) -> Result<Vec<Context>> {
        let eval = Evaluator::new(arena);
        let nodes = eval.evaluate_nodes(set, ctx)?;
        let members = eval.member_contexts(&nodes, ctx)?;
        let targets: Vec<(ExprId, Context)> =
            members.iter().map(|m| (predicate, m.clone())).collect();
        self.bind_all(arena, &targets)?;
        Ok(members)
    }

    fn unbind(&self, arena: &ExpressionArena, expr: ExprId, ctx: &Context) -> Result<()> {
        let binding = {
            let index = self
                .binding_index(expr, ctx)
                .ok_or_else(|| Error::unbound(arena.describe(expr)))?;
            let mut bindings = self.bindings.borrow_mut();
            let list = bindings
                .get_mut(&expr)
                .ok_or_else(|| Error::unbound(arena.describe(expr)))?;
            let binding = list.remove(index);
            if list.is_empty() {
                bindings.remove(&expr);
            }
            binding
        };
        let ctx = &binding.ctx;
        log::debug!("unbinding {} at {}", arena.describe(expr), ctx.node());
        match (&binding.installed, arena.kind(expr)) {
            (Installed::Path(bridge), ExprKind::Path(path)) => {
                let removed = self.leaves.borrow_mut().remove_all(expr, ctx);
                for (node, id) in removed {
                    self.tree.remove_listener(node, id);
                }
                path.unbind(ctx, bridge)
            }
            (Installed::Arguments, _) => {
                let targets: Vec<(ExprId, Context)> = arena
                    .arguments(expr)
                    .into_iter()
                    .map(|arg| (arg, ctx.clone()))
                    .collect();
                self.unbind_all(arena, &targets)
            }
            (Installed::Conditional { branch }, ExprKind::Conditional { condition, .. }) => {
                self.unbind_all(arena, &[(*condition, ctx.clone()), (*branch, ctx.clone())])
            }
            (Installed::Let { nested }, _) => {
                let targets: Vec<(ExprId, Context)> = arena
                    .arguments(expr)
                    .into_iter()
                    .map(|arg| (arg, nested.clone()))
                    .collect();
                self.unbind_all(arena, &targets)
            }
            (Installed::Filter { members }, ExprKind::Filter { set, predicate }) => {
                let mut targets = vec![(*set, ctx.clone())];
                targets.extend(members.iter().map(|m| (*predicate, m.clone())));
                self.unbind_all(arena, &targets)
            }
            _ => Ok(()),
        }
    }

    fn install_leaf(&self, expr: ExprId, ctx: &Context, node: NodeId) {
        if self.leaves.borrow().get(node, expr, ctx).is_some() {
            return;
        }
        let sink: Weak<dyn LeafValueSink> = self.this.clone();
        let listener = Rc::new(LeafValueListener::new(sink, expr, ctx.clone()));
        let id = self.tree.add_listener(node, listener);
        self.leaves.borrow_mut().insert(node, expr, ctx.clone(), id);
    }

    fn uninstall_leaf(&self, expr: ExprId, ctx: &Context, node: NodeId) {
        let removed = self.leaves.borrow_mut().remove(node, expr, ctx);
        if let Some(id) = removed {
            self.tree.remove_listener(node, id);
        }
    }

    // ---- rebind ----

    fn taken_branch(&self, arena: &ExpressionArena, expr: ExprId, ctx: &Context) -> Result<ExprId> {
        match arena.kind(expr) {
            ExprKind::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let value = Evaluator::new(arena).evaluate(*condition, ctx)?;
                Ok(if convert::to_boolean(&value) { *then } else { *otherwise })
            }
            _ => Err(Error::invalid_operation(format!(
                "{} is not a conditional",
                arena.describe(expr)
            ))),
        }
    }

    /// Rebinds the live part of a conditional, let or filter if `child`'s
    /// change altered it.
    fn rebind_if_needed(
        &self,
        arena: &ExpressionArena,
        expr: ExprId,
        ctx: &Context,
        child: ExprId,
    ) -> Result<()> {
        let index = self
            .binding_index(expr, ctx)
            .ok_or_else(|| Error::unbound(arena.describe(expr)))?;
        let (binding_ctx, live) = {
            let bindings = self.bindings.borrow();
            let binding = &bindings[&expr][index];
            let live = match &binding.installed {
                Installed::Conditional { branch } => Live::Branch(*branch),
                Installed::Let { nested } => Live::Scope(nested.clone()),
                Installed::Filter { members } => Live::Members(members.clone()),
                _ => return Ok(()),
            };
            (binding.ctx.clone(), live)
        };

        let replacement = match (live, arena.kind(expr)) {
            (Live::Branch(old), ExprKind::Conditional { .. }) => {
                let new = self.taken_branch(arena, expr, &binding_ctx)?;
                if new == old {
                    return Ok(());
                }
                self.swap(arena, &[(old, binding_ctx.clone())], || {
                    self.bind(arena, new, &binding_ctx, true)?;
                    Ok(Installed::Conditional { branch: new })
                })?
            }
            (Live::Scope(nested), ExprKind::Let { body, .. }) => {
                if child == *body {
                    return Ok(());
                }
                let targets: Vec<(ExprId, Context)> = arena
                    .arguments(expr)
                    .into_iter()
                    .map(|arg| (arg, nested.clone()))
                    .collect();
                self.swap(arena, &targets, || {
                    let nested = self.bind_let_scope(arena, expr, &binding_ctx)?;
                    Ok(Installed::Let { nested })
                })?
            }
            (Live::Members(members), ExprKind::Filter { set, predicate }) => {
                let nodes = Evaluator::new(arena).evaluate_nodes(*set, &binding_ctx)?;
                let unchanged = nodes.len() == members.len()
                    && nodes.iter().zip(&members).all(|(n, m)| *n == m.node());
                if unchanged {
                    return Ok(());
                }
                let targets: Vec<(ExprId, Context)> =
                    members.iter().map(|m| (*predicate, m.clone())).collect();
                self.swap(arena, &targets, || {
                    let members = self.bind_members(arena, *set, *predicate, &binding_ctx)?;
                    Ok(Installed::Filter { members })
                })?
            }
            _ => return Ok(()),
        };

        log::debug!("rebound {} at {}", arena.describe(expr), binding_ctx.node());
        let mut bindings = self.bindings.borrow_mut();
        if let Some(binding) = bindings
            .get_mut(&expr)
            .and_then(|list| list.iter_mut().find(|b| b.ctx.ptr_eq(&binding_ctx)))
        {
            binding.installed = replacement;
        }
        Ok(())
    }

    /// Unbinds `old` against the reverted tree, then runs `bind_new` against
    /// the restored tree.
    fn swap(
        &self,
        arena: &ExpressionArena,
        old: &[(ExprId, Context)],
        bind_new: impl FnOnce() -> Result<Installed>,
    ) -> Result<Installed> {
        let guard = Reverted::enter(&*self.tree)?;
        let unbound = self.unbind_all(arena, old);
        guard.exit()?;
        unbound?;
        bind_new()
    }

    // ---- notification ----

    /// Entry point for raw changes of a bound path expression.
    fn path_changed(&self, expr: ExprId, ctx: &Context, nodes: &[NodeId], added: bool) {
        if self.binding_index(expr, ctx).is_none() {
            let arena = self.arena();
            self.fault(&arena, expr, ctx, &Error::unbound(arena.describe(expr)));
            return;
        }
        for node in nodes {
            if added {
                self.install_leaf(expr, ctx, *node);
            } else {
                self.uninstall_leaf(expr, ctx, *node);
            }
        }
        let arena = self.arena();
        if let Err(e) = self.refresh(&arena, expr, ctx) {
            self.fault(&arena, expr, ctx, &e);
        }
    }

    /// Recomputes `expr` by evaluating it against both tree states.
    fn refresh(&self, arena: &ExpressionArena, expr: ExprId, ctx: &Context) -> Result<()> {
        if !ctx.should_update(expr) {
            return Ok(());
        }
        let (old, new) = notifier::dual_evaluate(arena, expr, ctx)?;
        self.emit(arena, expr, ctx, &old, &new, false);
        Ok(())
    }

    /// Handles a change of `child`, an argument of `expr` bound in `ctx`.
    fn child_changed(
        &self,
        arena: &ExpressionArena,
        expr: ExprId,
        ctx: &Context,
        child: ExprId,
        change: &ChildChange,
    ) -> Result<()> {
        self.rebind_if_needed(arena, expr, ctx, child)?;
        if !ctx.should_update(expr) {
            return Ok(());
        }
        let (old, new) = match change.pinned() {
            Some((old, new)) if counterfactual::applies_to(arena.kind(expr)) => {
                counterfactual::evaluate(arena, expr, ctx, child, &old, &new)?
            }
            _ => notifier::dual_evaluate(arena, expr, ctx)?,
        };
        self.emit(arena, expr, ctx, &old, &new, change.touches_values());
        Ok(())
    }

    /// Reports the change of `expr` to its listeners and its parent.
    ///
    /// A node-set with unchanged membership is still passed on when `values`
    /// is set, since its parent may read the member values.
    fn emit(
        &self,
        arena: &ExpressionArena,
        expr: ExprId,
        ctx: &Context,
        old: &Value,
        new: &Value,
        values: bool,
    ) {
        let notifications = notifier::notifications(old, new);
        let member_values = values && matches!(new, Value::NodeSet(_));
        if notifications.is_empty() && !member_values {
            return;
        }
        if !notifications.is_empty() {
            log::debug!(
                "{} at {}: {} notifications",
                arena.describe(expr),
                ctx.node(),
                notifications.len()
            );
            if let Some(fan) = self.fan_out(expr) {
                for notification in &notifications {
                    fan.dispatch(expr, ctx, notification);
                }
            }
        }
        self.propagate(arena, expr, ctx, &ChildChange::between(old, new, values));
    }

    /// Hands a leaf value change of `node` to the listeners of `expr` and of
    /// every node-set ancestor whose result is built from it and still
    /// contains the node.
    fn forward_value(
        &self,
        arena: &ExpressionArena,
        expr: ExprId,
        ctx: &Context,
        node: NodeId,
        new: Option<&str>,
        old: Option<&str>,
    ) {
        let mut current = Some((expr, ctx.clone()));
        let mut known_member = true;
        while let Some((expr, ctx)) = current {
            let fan = self
                .fan_out(expr)
                .filter(|fan| fan.requires_value_notification());
            if let Some(fan) = fan {
                let member = known_member
                    || match Evaluator::new(arena).evaluate_nodes(expr, &ctx) {
                        Ok(nodes) => nodes.contains(&node),
                        Err(e) => {
                            self.fault(arena, expr, &ctx, &e);
                            false
                        }
                    };
                if member {
                    let notification = Notification::Value {
                        contexts: vec![ctx.clone()],
                        node,
                        new: new.map(String::from),
                        old: old.map(String::from),
                    };
                    fan.dispatch(expr, &ctx, &notification);
                }
            }
            known_member = false;
            current = match self.is_owned(expr, &ctx) {
                Some(true) => parent_binding(arena, expr, &ctx).filter(|(parent, parent_ctx)| {
                    feeds_result(arena, *parent, expr)
                        && Evaluator::new(arena).result_type(*parent, parent_ctx).ok()
                            == Some(ResultType::NodeSet)
                }),
                _ => None,
            };
        }
    }

    /// Passes a change of `child` bound in `child_ctx` to its parent.
    fn propagate(
        &self,
        arena: &ExpressionArena,
        child: ExprId,
        child_ctx: &Context,
        change: &ChildChange,
    ) {
        if self.is_owned(child, child_ctx) != Some(true) {
            return;
        }
        let Some((parent, parent_ctx)) = parent_binding(arena, child, child_ctx) else {
            return;
        };
        if let Err(e) = self.child_changed(arena, parent, &parent_ctx, child, change) {
            self.fault(arena, parent, &parent_ctx, &e);
        }
    }

    /// Logs `error` and hands it to the listeners of `expr` and its ancestors.
    fn fault(&self, arena: &ExpressionArena, expr: ExprId, ctx: &Context, error: &Error) {
        log::warn!(
            "dropping change of {} at {}: {}",
            arena.describe(expr),
            ctx.node(),
            error
        );
        let mut current = Some((expr, ctx.clone()));
        while let Some((expr, ctx)) = current {
            if let Some(fan) = self.fan_out(expr) {
                fan.fault(expr, &ctx, error);
            }
            current = match self.is_owned(expr, &ctx) {
                Some(true) => parent_binding(arena, expr, &ctx),
                _ => None,
            };
        }
    }
}

/// The live part of a rebinding expression.
enum Live {
    Branch(ExprId),
    Scope(Context),
    Members(Vec<Context>),
}

/// Returns the parent of `child` and the context the parent is bound in.
fn parent_binding(
    arena: &ExpressionArena,
    child: ExprId,
    child_ctx: &Context,
) -> Option<(ExprId, Context)> {
    let parent = arena.parent(child)?;
    let ctx = match arena.kind(parent) {
        ExprKind::Let { .. } => child_ctx.parent()?.clone(),
        ExprKind::Filter { predicate, .. } if *predicate == child => child_ctx.parent()?.clone(),
        _ => child_ctx.clone(),
    };
    Some((parent, ctx))
}

/// Returns true if the result of `parent` is made of the nodes of `child`.
fn feeds_result(arena: &ExpressionArena, parent: ExprId, child: ExprId) -> bool {
    match arena.kind(parent) {
        ExprKind::Filter { set, .. } => *set == child,
        ExprKind::Conditional { condition, .. } => *condition != child,
        ExprKind::Let { .. } => true,
        _ => false,
    }
}

impl LeafValueSink for EngineState {
    fn leaf_value(
        &self,
        expr: ExprId,
        ctx: &Context,
        node: NodeId,
        new: Option<&str>,
        old: Option<&str>,
    ) {
        let arena = self.arena();
        self.forward_value(&arena, expr, ctx, node, new, old);
        let nodes = match Evaluator::new(&arena).evaluate_nodes(expr, ctx) {
            Ok(nodes) => nodes,
            Err(e) => {
                self.fault(&arena, expr, ctx, &e);
                return;
            }
        };
        let change = ChildChange::Nodes {
            old: nodes.clone(),
            new: nodes,
            values: true,
        };
        self.propagate(&arena, expr, ctx, &change);
    }
}

/// Path listener forwarding raw path changes to the engine.
struct PathBridge {
    engine: Weak<EngineState>,
    expr: ExprId,
}

impl PathListener for PathBridge {
    fn notify_add(&self, ctx: &Context, nodes: &[NodeId], _depth: usize) {
        if let Some(engine) = self.engine.upgrade() {
            engine.path_changed(self.expr, ctx, nodes, true);
        }
    }

    fn notify_remove(&self, ctx: &Context, nodes: &[NodeId], _depth: usize) {
        if let Some(engine) = self.engine.upgrade() {
            engine.path_changed(self.expr, ctx, nodes, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_query::ChildPath;
    use arbor_storage::MemoryTree;
    use core::cell::Cell;

    #[derive(Default)]
    struct Counter {
        number: RefCell<Vec<(f64, f64)>>,
        inserts: Cell<usize>,
    }

    impl ExpressionListener for Counter {
        fn notify_change_number(
            &self,
            _expr: ExprId,
            _ctx: &Context,
            new: f64,
            old: f64,
        ) -> Result<()> {
            self.number.borrow_mut().push((new, old));
            Ok(())
        }

        fn notify_insert(
            &self,
            _: ExprId,
            _: &Context,
            _: &[NodeId],
            _: usize,
            count: usize,
        ) -> Result<()> {
            self.inserts.set(self.inserts.get() + count);
            Ok(())
        }
    }

    fn path(arena: &mut ExpressionArena, text: &str) -> ExprId {
        arena.path(text.parse::<ChildPath>().unwrap())
    }

    #[test]
    fn test_double_bind_is_error() {
        let tree = MemoryTree::new("root");
        let engine = Engine::new(tree.handle());
        let expr = engine.build(|a| path(a, "item"));
        let ctx = engine.root_context();

        engine.bind(expr, &ctx).unwrap();
        assert!(matches!(
            engine.bind(expr, &ctx),
            Err(Error::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_foreign_expression_is_rejected() {
        let tree = MemoryTree::new("root");
        let engine = Engine::new(tree.handle());
        let other = Engine::new(tree.handle());
        let expr = other.build(|a| path(a, "item"));
        let ctx = engine.root_context();

        assert!(matches!(
            engine.bind(expr, &ctx),
            Err(Error::InvalidOperation { .. })
        ));
        assert!(matches!(
            engine.unbind(expr, &ctx),
            Err(Error::InvalidOperation { .. })
        ));
        assert!(matches!(
            engine.evaluate(expr, &ctx),
            Err(Error::InvalidOperation { .. })
        ));
        let counter = Rc::new(Counter::default());
        assert!(engine.add_notify_listener(expr, &ctx, counter).is_err());
        assert_eq!(engine.binding_count(), 0);
    }

    #[test]
    fn test_unbind_unknown_is_unbound_context() {
        let tree = MemoryTree::new("root");
        let engine = Engine::new(tree.handle());
        let expr = engine.build(|a| a.literal(1.0));
        let ctx = engine.root_context();

        assert!(matches!(
            engine.unbind(expr, &ctx),
            Err(Error::UnboundContext { .. })
        ));
    }

    #[test]
    fn test_unbind_removes_every_listener() {
        let tree = MemoryTree::new("root");
        tree.append(tree.root(), "item", Some("1")).unwrap();
        let engine = Engine::new(tree.handle());
        let expr = engine.build(|a| {
            let items = path(a, "item");
            let count = a.count(items);
            let other = path(a, "item");
            a.add(count, other)
        });
        let ctx = engine.root_context();

        engine.bind(expr, &ctx).unwrap();
        assert_eq!(engine.binding_count(), 4);
        assert!(tree.total_listener_count() > 0);
        assert_eq!(engine.leaf_listener_count(), 2);

        engine.unbind(expr, &ctx).unwrap();
        assert_eq!(engine.binding_count(), 0);
        assert_eq!(engine.leaf_listener_count(), 0);
        assert_eq!(tree.total_listener_count(), 0);
    }

    #[test]
    fn test_count_follows_inserts() {
        let tree = MemoryTree::new("root");
        let engine = Engine::new(tree.handle());
        let (items, count) = engine.build(|a| {
            let items = path(a, "item");
            (items, a.count(items))
        });
        let ctx = engine.root_context();
        let counter = Rc::new(Counter::default());
        engine.add_notify_listener(count, &ctx, counter.clone()).unwrap();
        let item_counter = Rc::new(Counter::default());
        engine.add_listener(items, &ctx, item_counter.clone());

        tree.append(tree.root(), "item", None).unwrap();
        tree.append(tree.root(), "other", None).unwrap();
        tree.append(tree.root(), "item", None).unwrap();

        assert_eq!(
            *counter.number.borrow(),
            vec![(0.0, 0.0), (1.0, 0.0), (2.0, 1.0)]
        );
        assert_eq!(item_counter.inserts.get(), 2);
    }

    #[test]
    fn test_leaf_value_change_reaches_scalar_parent() {
        let tree = MemoryTree::new("root");
        let item = tree.append(tree.root(), "item", Some("4")).unwrap();
        let engine = Engine::new(tree.handle());
        let expr = engine.build(|a| {
            let items = path(a, "item");
            let two = a.literal(2.0);
            a.mul(items, two)
        });
        let ctx = engine.root_context();
        let counter = Rc::new(Counter::default());
        engine.bind(expr, &ctx).unwrap();
        engine.add_listener(expr, &ctx, counter.clone());

        tree.set_value(item, Some("5")).unwrap();
        tree.set_value(item, Some("5")).unwrap();
        assert_eq!(*counter.number.borrow(), vec![(10.0, 8.0)]);
    }
}
