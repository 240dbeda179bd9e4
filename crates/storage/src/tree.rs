//! In-memory tree provider.
//!
//! `MemoryTree` is a cheaply cloneable handle on shared node storage. All
//! reads and mutations go through `&self`; no borrow is held while raw
//! listeners run, so listeners may read the tree, revert and restore it,
//! and install or remove further listeners from inside a callback.

use crate::journal::{Journal, JournalEntry, NodeData, NodeTable};
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use arbor_core::{Checkpoint, Error, ListenerId, NodeId, NodeListener, Result, Tree};
use core::cell::RefCell;
use hashbrown::HashMap;

/// Loader used to populate a lazily synced node value.
pub type ValueLoader = Rc<dyn Fn() -> String>;

type ListenerList = Vec<(ListenerId, Rc<dyn NodeListener>)>;

struct TreeState {
    nodes: NodeTable,
    root: NodeId,
    next_node: u64,
    listeners: HashMap<NodeId, ListenerList>,
    next_listener: ListenerId,
    loaders: HashMap<NodeId, ValueLoader>,
    journal: Journal,
    checkpoint: Checkpoint,
    serial: u64,
}

impl TreeState {
    fn listeners_of(&self, node: NodeId) -> Vec<Rc<dyn NodeListener>> {
        self.listeners
            .get(&node)
            .map(|list| list.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default()
    }

    fn node(&self, node: NodeId) -> Result<&NodeData> {
        self.nodes.get(&node).ok_or(Error::node_not_found(node))
    }
}

/// Shared in-memory tree with a one-level checkpoint.
#[derive(Clone)]
pub struct MemoryTree {
    state: Rc<RefCell<TreeState>>,
}

impl MemoryTree {
    /// Creates a tree holding a single root node.
    pub fn new(root_name: impl Into<String>) -> Self {
        let mut nodes = NodeTable::new();
        let root = NodeId(0);
        nodes.insert(root, NodeData::new(root_name));
        Self {
            state: Rc::new(RefCell::new(TreeState {
                nodes,
                root,
                next_node: 1,
                listeners: HashMap::new(),
                next_listener: 1,
                loaders: HashMap::new(),
                journal: Journal::new(),
                checkpoint: Checkpoint::Current,
                serial: 0,
            })),
        }
    }

    /// Returns this tree as a shared trait object.
    pub fn handle(&self) -> Rc<dyn Tree> {
        Rc::new(self.clone())
    }

    /// Creates a detached node. Creation is not a mutation of the tree.
    pub fn create_node(&self, name: impl Into<String>) -> NodeId {
        let mut state = self.state.borrow_mut();
        let id = NodeId(state.next_node);
        state.next_node += 1;
        state.nodes.insert(id, NodeData::new(name));
        id
    }

    /// Creates a node with a value and appends it under `parent`.
    pub fn append(
        &self,
        parent: NodeId,
        name: impl Into<String>,
        value: Option<&str>,
    ) -> Result<NodeId> {
        let child = self.create_node(name);
        if let Some(v) = value {
            self.state
                .borrow_mut()
                .nodes
                .get_mut(&child)
                .ok_or(Error::node_not_found(child))?
                .value = Some(v.into());
        }
        let index = self.state.borrow().node(parent)?.children.len();
        self.add_child(parent, child, index)?;
        Ok(child)
    }

    /// Attaches a detached node under `parent` at `index`.
    pub fn add_child(&self, parent: NodeId, child: NodeId, index: usize) -> Result<()> {
        {
            let state = self.state.borrow();
            if state.node(child)?.parent.is_some() || child == state.root {
                return Err(Error::invalid_operation("node is already attached"));
            }
        }
        self.commit(JournalEntry::AddChild {
            parent,
            child,
            index,
        })
    }

    /// Detaches `child` from `parent`. The detached subtree stays readable.
    pub fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<()> {
        let index = {
            let state = self.state.borrow();
            state
                .node(parent)?
                .children
                .iter()
                .position(|c| *c == child)
                .ok_or(Error::invalid_operation("node is not a child of parent"))?
        };
        self.commit(JournalEntry::RemoveChild {
            parent,
            child,
            index,
        })
    }

    /// Marks a node's value stale; the loader populates it on the next read.
    pub fn set_lazy_value(
        &self,
        node: NodeId,
        loader: impl Fn() -> String + 'static,
    ) -> Result<()> {
        let listeners = {
            let mut state = self.state.borrow_mut();
            state.node(node)?;
            state.loaders.insert(node, Rc::new(loader));
            state.listeners_of(node)
        };
        for listener in listeners {
            listener.notify_dirty(node);
        }
        Ok(())
    }

    /// Returns the number of raw listeners installed on a node.
    pub fn listener_count(&self, node: NodeId) -> usize {
        self.state
            .borrow()
            .listeners
            .get(&node)
            .map(|l| l.len())
            .unwrap_or(0)
    }

    /// Returns the number of raw listeners installed anywhere in the tree.
    pub fn total_listener_count(&self) -> usize {
        self.state.borrow().listeners.values().map(|l| l.len()).sum()
    }

    fn commit(&self, entry: JournalEntry) -> Result<()> {
        let listeners = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            if state.checkpoint == Checkpoint::Reverted {
                return Err(Error::invalid_operation("tree is reverted"));
            }
            state.journal.commit(entry.clone(), &mut state.nodes)?;
            state.serial += 1;
            state.listeners_of(entry.node())
        };
        log::trace!("commit {:?}", entry);
        for listener in listeners {
            match &entry {
                JournalEntry::AddChild {
                    parent,
                    child,
                    index,
                } => listener.notify_add_child(*parent, *child, *index),
                JournalEntry::RemoveChild {
                    parent,
                    child,
                    index,
                } => listener.notify_remove_child(*parent, *child, *index),
                JournalEntry::SetValue { node, old, new } => {
                    listener.notify_value(*node, new.as_deref(), old.as_deref())
                }
                JournalEntry::SetAttribute {
                    node,
                    name,
                    old,
                    new,
                } => listener.notify_attribute(*node, name, new.as_deref(), old.as_deref()),
            }
        }
        Ok(())
    }
}

impl Tree for MemoryTree {
    fn root(&self) -> NodeId {
        self.state.borrow().root
    }

    fn name(&self, node: NodeId) -> Option<String> {
        self.state.borrow().nodes.get(&node).map(|n| n.name.clone())
    }

    fn value(&self, node: NodeId) -> Option<String> {
        let loader = {
            let mut state = self.state.borrow_mut();
            if state.checkpoint == Checkpoint::Current {
                state.loaders.remove(&node)
            } else {
                None
            }
        };
        if let Some(loader) = loader {
            let loaded = loader();
            if let Err(e) = self.set_value(node, Some(&loaded)) {
                log::warn!("failed to sync {}: {}", node, e);
            }
        }
        self.state.borrow().nodes.get(&node).and_then(|n| n.value.clone())
    }

    fn set_value(&self, node: NodeId, value: Option<&str>) -> Result<()> {
        let old = self.state.borrow().node(node)?.value.clone();
        if old.as_deref() == value {
            return Ok(());
        }
        self.commit(JournalEntry::SetValue {
            node,
            old,
            new: value.map(String::from),
        })
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.state
            .borrow()
            .nodes
            .get(&node)
            .and_then(|n| n.attributes.get(name).cloned())
    }

    fn set_attribute(&self, node: NodeId, name: &str, value: Option<&str>) -> Result<()> {
        let old = self.state.borrow().node(node)?.attributes.get(name).cloned();
        if old.as_deref() == value {
            return Ok(());
        }
        self.commit(JournalEntry::SetAttribute {
            node,
            name: name.into(),
            old,
            new: value.map(String::from),
        })
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.state
            .borrow()
            .nodes
            .get(&node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.state.borrow().nodes.get(&node).and_then(|n| n.parent)
    }

    fn is_dirty(&self, node: NodeId) -> bool {
        self.state.borrow().loaders.contains_key(&node)
    }

    fn add_listener(&self, node: NodeId, listener: Rc<dyn NodeListener>) -> ListenerId {
        let mut state = self.state.borrow_mut();
        let id = state.next_listener;
        state.next_listener += 1;
        state.listeners.entry(node).or_default().push((id, listener));
        id
    }

    fn remove_listener(&self, node: NodeId, id: ListenerId) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(list) = state.listeners.get_mut(&node) else {
            return false;
        };
        let len_before = list.len();
        list.retain(|(lid, _)| *lid != id);
        let removed = list.len() < len_before;
        if list.is_empty() {
            state.listeners.remove(&node);
        }
        removed
    }

    fn revert(&self) -> Result<()> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        if state.checkpoint == Checkpoint::Reverted {
            return Err(Error::invalid_operation("nested revert"));
        }
        state.journal.undo(&mut state.nodes)?;
        state.checkpoint = Checkpoint::Reverted;
        Ok(())
    }

    fn restore(&self) -> Result<()> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        if state.checkpoint == Checkpoint::Current {
            return Err(Error::invalid_operation("restore without revert"));
        }
        state.journal.redo(&mut state.nodes)?;
        state.checkpoint = Checkpoint::Current;
        Ok(())
    }

    fn checkpoint(&self) -> Checkpoint {
        self.state.borrow().checkpoint
    }

    fn serial(&self) -> u64 {
        self.state.borrow().serial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use arbor_core::Reverted;

    #[derive(Default)]
    struct Recorder {
        events: RefCell<Vec<String>>,
    }

    impl NodeListener for Recorder {
        fn notify_add_child(&self, _parent: NodeId, child: NodeId, index: usize) {
            self.events
                .borrow_mut()
                .push(alloc::format!("add {} @{}", child, index));
        }

        fn notify_remove_child(&self, _parent: NodeId, child: NodeId, index: usize) {
            self.events
                .borrow_mut()
                .push(alloc::format!("remove {} @{}", child, index));
        }

        fn notify_value(&self, node: NodeId, new: Option<&str>, old: Option<&str>) {
            self.events
                .borrow_mut()
                .push(alloc::format!("value {} {:?}->{:?}", node, old, new));
        }

        fn notify_dirty(&self, node: NodeId) {
            self.events.borrow_mut().push(alloc::format!("dirty {}", node));
        }
    }

    #[test]
    fn test_append_and_read() {
        let tree = MemoryTree::new("root");
        let root = tree.root();
        let a = tree.append(root, "a", Some("1")).unwrap();
        let b = tree.append(root, "b", None).unwrap();

        assert_eq!(tree.children(root), vec![a, b]);
        assert_eq!(tree.name(a).as_deref(), Some("a"));
        assert_eq!(tree.value(a).as_deref(), Some("1"));
        assert_eq!(tree.value(b), None);
        assert_eq!(tree.parent(a), Some(root));
        assert_eq!(tree.serial(), 2);
    }

    #[test]
    fn test_revert_restore_value() {
        let tree = MemoryTree::new("root");
        let a = tree.append(tree.root(), "a", Some("2")).unwrap();
        tree.set_value(a, Some("5")).unwrap();

        tree.revert().unwrap();
        assert_eq!(tree.checkpoint(), Checkpoint::Reverted);
        assert_eq!(tree.value(a).as_deref(), Some("2"));
        tree.restore().unwrap();
        assert_eq!(tree.value(a).as_deref(), Some("5"));
    }

    #[test]
    fn test_revert_restore_structure() {
        let tree = MemoryTree::new("root");
        let root = tree.root();
        let a = tree.append(root, "a", None).unwrap();
        let b = tree.append(root, "b", None).unwrap();
        tree.remove_child(root, a).unwrap();

        {
            let _guard = Reverted::enter(&tree).unwrap();
            assert_eq!(tree.children(root), vec![a, b]);
        }
        assert_eq!(tree.checkpoint(), Checkpoint::Current);
        assert_eq!(tree.children(root), vec![b]);
    }

    #[test]
    fn test_nested_revert_rejected() {
        let tree = MemoryTree::new("root");
        tree.append(tree.root(), "a", None).unwrap();
        tree.revert().unwrap();
        assert!(tree.revert().is_err());
        assert!(tree.append(tree.root(), "b", None).is_err());
        tree.restore().unwrap();
        assert!(tree.restore().is_err());
    }

    #[test]
    fn test_listeners_fire_after_commit() {
        let tree = MemoryTree::new("root");
        let root = tree.root();
        let recorder = Rc::new(Recorder::default());
        let id = tree.add_listener(root, recorder.clone());

        let a = tree.append(root, "a", None).unwrap();
        tree.remove_child(root, a).unwrap();
        assert_eq!(
            *recorder.events.borrow(),
            vec![
                alloc::format!("add {} @0", a),
                alloc::format!("remove {} @0", a)
            ]
        );

        assert!(tree.remove_listener(root, id));
        assert!(!tree.remove_listener(root, id));
        assert_eq!(tree.listener_count(root), 0);
    }

    #[test]
    fn test_unchanged_value_is_not_a_mutation() {
        let tree = MemoryTree::new("root");
        let a = tree.append(tree.root(), "a", Some("x")).unwrap();
        let serial = tree.serial();
        tree.set_value(a, Some("x")).unwrap();
        assert_eq!(tree.serial(), serial);
    }

    #[test]
    fn test_lazy_value_syncs_on_read() {
        let tree = MemoryTree::new("root");
        let a = tree.append(tree.root(), "a", None).unwrap();
        let recorder = Rc::new(Recorder::default());
        tree.add_listener(a, recorder.clone());

        tree.set_lazy_value(a, || "loaded".into()).unwrap();
        assert!(tree.is_dirty(a));
        assert_eq!(tree.value(a).as_deref(), Some("loaded"));
        assert!(!tree.is_dirty(a));
        assert_eq!(
            *recorder.events.borrow(),
            vec![
                alloc::format!("dirty {}", a),
                alloc::format!("value {} None->Some(\"loaded\")", a)
            ]
        );
    }

    #[test]
    fn test_attach_twice_rejected() {
        let tree = MemoryTree::new("root");
        let a = tree.append(tree.root(), "a", None).unwrap();
        assert!(tree.add_child(tree.root(), a, 0).is_err());
    }
}
