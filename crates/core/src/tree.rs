//! The tree-provider contract.
//!
//! The reactive core never owns tree storage. It reads nodes, installs raw
//! mutation listeners and drives a one-level checkpoint through this trait;
//! `arbor-storage` provides the in-memory implementation.

use crate::error::Result;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

/// Opaque handle of a node inside a tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier returned by `Tree::add_listener`.
pub type ListenerId = u64;

/// Shared handle on a tree provider.
pub type TreeHandle = Rc<dyn Tree>;

/// Which committed state a tree currently presents to readers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Checkpoint {
    /// The state after the most recent mutation.
    #[default]
    Current,
    /// The state immediately before the most recent mutation.
    Reverted,
}

/// Observer of raw mutations on a single node.
///
/// Every method has an empty default so observers implement only the
/// events they care about.
pub trait NodeListener {
    /// A child was inserted under `parent` at `index`.
    fn notify_add_child(&self, _parent: NodeId, _child: NodeId, _index: usize) {}

    /// A child was removed from `parent`; `index` is its former position.
    fn notify_remove_child(&self, _parent: NodeId, _child: NodeId, _index: usize) {}

    /// The bare value of `node` changed.
    fn notify_value(&self, _node: NodeId, _new: Option<&str>, _old: Option<&str>) {}

    /// A named attribute of `node` changed.
    fn notify_attribute(
        &self,
        _node: NodeId,
        _name: &str,
        _new: Option<&str>,
        _old: Option<&str>,
    ) {
    }

    /// The value of `node` is stale and will be populated on the next read.
    fn notify_dirty(&self, _node: NodeId) {}
}

/// A mutable tree of named nodes with values, attributes and ordered children.
pub trait Tree {
    /// Returns the root node.
    fn root(&self) -> NodeId;

    /// Returns the name of a node.
    fn name(&self, node: NodeId) -> Option<String>;

    /// Returns the bare value of a node. Reading a dirty node forces it to sync.
    fn value(&self, node: NodeId) -> Option<String>;

    /// Sets the bare value of a node.
    fn set_value(&self, node: NodeId, value: Option<&str>) -> Result<()>;

    /// Returns a named attribute of a node.
    fn attribute(&self, node: NodeId, name: &str) -> Option<String>;

    /// Sets or clears a named attribute of a node.
    fn set_attribute(&self, node: NodeId, name: &str, value: Option<&str>) -> Result<()>;

    /// Returns the ordered children of a node.
    fn children(&self, node: NodeId) -> Vec<NodeId>;

    /// Returns the parent of a node, if attached.
    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Returns true if the node's value has not been populated yet.
    fn is_dirty(&self, node: NodeId) -> bool;

    /// Installs a raw mutation listener on a node.
    fn add_listener(&self, node: NodeId, listener: Rc<dyn NodeListener>) -> ListenerId;

    /// Removes a raw mutation listener. Returns false if it was not installed.
    fn remove_listener(&self, node: NodeId, id: ListenerId) -> bool;

    /// Presents the state immediately before the most recent mutation.
    fn revert(&self) -> Result<()>;

    /// Presents the state after the most recent mutation again.
    fn restore(&self) -> Result<()>;

    /// Returns which state is presented.
    fn checkpoint(&self) -> Checkpoint;

    /// Returns the serial number of the most recent committed mutation.
    fn serial(&self) -> u64;
}

/// Reverts a tree for the lifetime of the guard.
///
/// Dropping the guard restores the current state, so an evaluation that
/// fails part way never leaves the tree reverted.
pub struct Reverted<'a> {
    tree: &'a dyn Tree,
}

impl<'a> Reverted<'a> {
    /// Reverts `tree` and returns the guard.
    pub fn enter(tree: &'a dyn Tree) -> Result<Self> {
        tree.revert()?;
        Ok(Self { tree })
    }

    /// Restores explicitly, surfacing any restore error.
    pub fn exit(self) -> Result<()> {
        let tree = self.tree;
        core::mem::forget(self);
        tree.restore()
    }
}

impl Drop for Reverted<'_> {
    fn drop(&mut self) {
        // Restore is infallible once revert succeeded on a single level.
        let _ = self.tree.restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn test_node_id_display() {
        assert_eq!(format!("{}", NodeId(3)), "#3");
    }

    #[test]
    fn test_checkpoint_default() {
        assert_eq!(Checkpoint::default(), Checkpoint::Current);
    }
}
