//! Evaluation contexts.
//!
//! A `Context` names the node an expression is evaluated against, its
//! 1-based position and the size of the sibling group it came from. Contexts
//! form a chain: a root context owns the variable scope and the update
//! tracker, sub-contexts forward both to their ancestors, and nested
//! contexts (pushed by `let`) own a fresh scope of their own.

use crate::ast::ExprId;
use alloc::rc::Rc;
use alloc::string::String;
use arbor_core::{Error, NodeId, Result, Tree, TreeHandle, Value};
use core::cell::RefCell;
use core::fmt;
use core::hash::{Hash, Hasher};
use hashbrown::HashMap;

/// Named variables visible to an expression.
#[derive(Clone, Debug, Default)]
pub struct VariableScope {
    variables: HashMap<String, Value>,
}

impl VariableScope {
    /// Creates an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a variable.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Sets a variable, returning the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.variables.insert(name.into(), value)
    }

    /// Returns the number of variables.
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Returns true if no variable is set.
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// Key identifying an expression bound in a context, for update sequencing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UpdateKey {
    expr: ExprId,
    node: NodeId,
    position: usize,
    size: usize,
}

/// Suppresses duplicate work within one update pass.
///
/// An update pass is one committed tree mutation, identified by its serial.
#[derive(Debug, Default)]
pub struct UpdateTracker {
    last: HashMap<UpdateKey, u64>,
}

impl UpdateTracker {
    /// Returns true the first time a key is seen for `serial`.
    pub fn should_update(&mut self, key: UpdateKey, serial: u64) -> bool {
        !matches!(self.last.insert(key, serial), Some(prev) if prev == serial)
    }

    /// Drops the record for a key.
    pub fn forget(&mut self, key: &UpdateKey) {
        self.last.remove(key);
    }

    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.last.len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}

struct ContextInner {
    tree: TreeHandle,
    node: NodeId,
    position: usize,
    size: usize,
    parent: Option<Context>,
    scope: Option<RefCell<VariableScope>>,
    tracker: Option<RefCell<UpdateTracker>>,
}

/// An evaluation environment. Cloning is cheap and shares the same context.
#[derive(Clone)]
pub struct Context {
    inner: Rc<ContextInner>,
}

impl Context {
    /// Creates a root context on `node` owning a fresh scope and update tracker.
    pub fn root(tree: TreeHandle, node: NodeId) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                tree,
                node,
                position: 1,
                size: 1,
                parent: None,
                scope: Some(RefCell::new(VariableScope::new())),
                tracker: Some(RefCell::new(UpdateTracker::default())),
            }),
        }
    }

    /// Creates a sub-context for one member of a sibling group.
    ///
    /// Positions begin with 1 and must not exceed `size`.
    pub fn sub(&self, node: NodeId, position: usize, size: usize) -> Result<Self> {
        if position == 0 || position > size {
            return Err(Error::arity("position values begin with 1 and must not exceed size"));
        }
        Ok(Self {
            inner: Rc::new(ContextInner {
                tree: self.inner.tree.clone(),
                node,
                position,
                size,
                parent: Some(self.clone()),
                scope: None,
                tracker: None,
            }),
        })
    }

    /// Pushes a nested context on the same node with a scope of its own.
    pub fn nested(&self) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                tree: self.inner.tree.clone(),
                node: self.inner.node,
                position: self.inner.position,
                size: self.inner.size,
                parent: Some(self.clone()),
                scope: Some(RefCell::new(VariableScope::new())),
                tracker: None,
            }),
        }
    }

    /// Returns the tree handle.
    #[inline]
    pub fn tree(&self) -> &dyn Tree {
        &*self.inner.tree
    }

    /// Returns a clone of the shared tree handle.
    #[inline]
    pub fn tree_handle(&self) -> TreeHandle {
        self.inner.tree.clone()
    }

    /// Returns the context node.
    #[inline]
    pub fn node(&self) -> NodeId {
        self.inner.node
    }

    /// Returns the 1-based position.
    #[inline]
    pub fn position(&self) -> usize {
        self.inner.position
    }

    /// Returns the sibling group size.
    #[inline]
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Returns the parent context.
    #[inline]
    pub fn parent(&self) -> Option<&Context> {
        self.inner.parent.as_ref()
    }

    /// Returns true if both handles share the same context.
    #[inline]
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Looks a variable up along the scope chain.
    pub fn variable(&self, name: &str) -> Option<Value> {
        let mut current = Some(self);
        while let Some(ctx) = current {
            if let Some(scope) = &ctx.inner.scope {
                if let Some(v) = scope.borrow().get(name) {
                    return Some(v.clone());
                }
            }
            current = ctx.parent();
        }
        None
    }

    /// Sets a variable in the nearest context owning a scope.
    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        let mut current = Some(self);
        while let Some(ctx) = current {
            if let Some(scope) = &ctx.inner.scope {
                scope.borrow_mut().set(name, value);
                return;
            }
            current = ctx.parent();
        }
    }

    /// Returns the update key of `expr` bound in this context.
    pub fn update_key(&self, expr: ExprId) -> UpdateKey {
        UpdateKey {
            expr,
            node: self.inner.node,
            position: self.inner.position,
            size: self.inner.size,
        }
    }

    /// Returns true the first time `expr` asks to update in this context during
    /// the current pass. Forwarded to the root of the chain.
    pub fn should_update(&self, expr: ExprId) -> bool {
        let key = self.update_key(expr);
        let serial = self.inner.tree.serial();
        match self.root_tracker() {
            Some(tracker) => tracker.borrow_mut().should_update(key, serial),
            None => true,
        }
    }

    /// Forgets update sequencing for `expr` in this context.
    pub fn forget_update(&self, expr: ExprId) {
        let key = self.update_key(expr);
        if let Some(tracker) = self.root_tracker() {
            tracker.borrow_mut().forget(&key);
        }
    }

    fn root_tracker(&self) -> Option<&RefCell<UpdateTracker>> {
        let mut current = Some(self);
        while let Some(ctx) = current {
            if let Some(tracker) = &ctx.inner.tracker {
                return Some(tracker);
            }
            current = ctx.parent();
        }
        None
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.inner.node != other.inner.node
            || self.inner.position != other.inner.position
            || self.inner.size != other.inner.size
        {
            return false;
        }
        match (&self.inner.parent, &other.inner.parent) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl Eq for Context {}

impl Hash for Context {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.node.hash(state);
        self.inner.position.hash(state);
        self.inner.size.hash(state);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("node", &self.inner.node)
            .field("position", &self.inner.position)
            .field("size", &self.inner.size)
            .field("nested", &self.inner.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_storage::MemoryTree;

    fn tree() -> MemoryTree {
        MemoryTree::new("root")
    }

    #[test]
    fn test_root_context() {
        let t = tree();
        let ctx = Context::root(t.handle(), t.root());
        assert_eq!(ctx.position(), 1);
        assert_eq!(ctx.size(), 1);
        assert!(ctx.parent().is_none());
    }

    #[test]
    fn test_sub_context_position_precondition() {
        let t = tree();
        let ctx = Context::root(t.handle(), t.root());
        assert!(ctx.sub(t.root(), 0, 3).is_err());
        assert!(ctx.sub(t.root(), 4, 3).is_err());
        let sub = ctx.sub(t.root(), 2, 3).unwrap();
        assert_eq!(sub.position(), 2);
        assert!(sub.parent().unwrap().ptr_eq(&ctx));
    }

    #[test]
    fn test_equality() {
        let t = tree();
        let a = t.append(t.root(), "a", None).unwrap();
        let ctx = Context::root(t.handle(), t.root());
        let other_root = Context::root(t.handle(), t.root());

        // Absent parents compare equal when node, position and size match.
        assert_eq!(ctx, other_root);
        assert_eq!(ctx.sub(a, 1, 2).unwrap(), ctx.sub(a, 1, 2).unwrap());
        assert_ne!(ctx.sub(a, 1, 2).unwrap(), ctx.sub(a, 2, 2).unwrap());
        assert_ne!(ctx, ctx.sub(a, 1, 1).unwrap());
    }

    #[test]
    fn test_variable_scoping() {
        let t = tree();
        let ctx = Context::root(t.handle(), t.root());
        ctx.set_variable("x", Value::Number(1.0));

        let sub = ctx.sub(t.root(), 1, 1).unwrap();
        sub.set_variable("y", Value::Number(2.0));
        assert_eq!(ctx.variable("y"), Some(Value::Number(2.0)));

        let nested = ctx.nested();
        nested.set_variable("x", Value::Number(3.0));
        assert_eq!(nested.variable("x"), Some(Value::Number(3.0)));
        assert_eq!(ctx.variable("x"), Some(Value::Number(1.0)));
        assert_eq!(nested.variable("missing"), None);
    }

    #[test]
    fn test_should_update_once_per_serial() {
        let t = tree();
        let ctx = Context::root(t.handle(), t.root());
        let sub = ctx.sub(t.root(), 1, 1).unwrap();
        let expr = ExprId(3);

        assert!(ctx.should_update(expr));
        assert!(!sub.should_update(expr));

        t.append(t.root(), "a", None).unwrap();
        assert!(sub.should_update(expr));
        assert!(!ctx.should_update(expr));

        ctx.forget_update(expr);
        assert!(ctx.should_update(expr));
    }

    #[test]
    fn test_scope() {
        let mut scope = VariableScope::new();
        assert!(scope.is_empty());
        assert_eq!(scope.set("a", Value::from(true)), None);
        assert_eq!(scope.set("a", Value::from(false)), Some(Value::from(true)));
        assert_eq!(scope.len(), 1);
    }
}
