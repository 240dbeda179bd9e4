//! Journal for the checkpoint substrate.
//!
//! Every committed mutation is recorded as a `JournalEntry` that knows how
//! to undo and redo itself. Only the most recent entry is kept: reverting
//! exposes the state immediately before the last mutation and restoring
//! re-applies it, one level deep.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use arbor_core::{Error, NodeId, Result};
use hashbrown::HashMap;

/// Storage for a single node.
#[derive(Clone, Debug, Default)]
pub struct NodeData {
    /// Node name.
    pub name: String,
    /// Bare value.
    pub value: Option<String>,
    /// Named attributes.
    pub attributes: BTreeMap<String, String>,
    /// Ordered children.
    pub children: Vec<NodeId>,
    /// Parent, if attached.
    pub parent: Option<NodeId>,
}

impl NodeData {
    /// Creates a detached node with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Node table keyed by node id.
pub type NodeTable = HashMap<NodeId, NodeData>;

/// A single committed mutation.
#[derive(Clone, Debug, PartialEq)]
pub enum JournalEntry {
    /// A child was attached.
    AddChild {
        parent: NodeId,
        child: NodeId,
        index: usize,
    },
    /// A child was detached.
    RemoveChild {
        parent: NodeId,
        child: NodeId,
        index: usize,
    },
    /// A bare value changed.
    SetValue {
        node: NodeId,
        old: Option<String>,
        new: Option<String>,
    },
    /// An attribute changed.
    SetAttribute {
        node: NodeId,
        name: String,
        old: Option<String>,
        new: Option<String>,
    },
}

impl JournalEntry {
    /// Returns the node whose listeners observe this entry.
    pub fn node(&self) -> NodeId {
        match self {
            JournalEntry::AddChild { parent, .. } => *parent,
            JournalEntry::RemoveChild { parent, .. } => *parent,
            JournalEntry::SetValue { node, .. } => *node,
            JournalEntry::SetAttribute { node, .. } => *node,
        }
    }

    /// Returns the entry that undoes this one.
    pub fn reverse(&self) -> Self {
        match self.clone() {
            JournalEntry::AddChild {
                parent,
                child,
                index,
            } => JournalEntry::RemoveChild {
                parent,
                child,
                index,
            },
            JournalEntry::RemoveChild {
                parent,
                child,
                index,
            } => JournalEntry::AddChild {
                parent,
                child,
                index,
            },
            JournalEntry::SetValue { node, old, new } => JournalEntry::SetValue {
                node,
                old: new,
                new: old,
            },
            JournalEntry::SetAttribute {
                node,
                name,
                old,
                new,
            } => JournalEntry::SetAttribute {
                node,
                name,
                old: new,
                new: old,
            },
        }
    }

    /// Applies this entry to a node table.
    pub fn apply(&self, nodes: &mut NodeTable) -> Result<()> {
        match self {
            JournalEntry::AddChild {
                parent,
                child,
                index,
            } => {
                let parent_data = nodes.get_mut(parent).ok_or(Error::node_not_found(*parent))?;
                if *index > parent_data.children.len() {
                    return Err(Error::arity("child index out of range"));
                }
                parent_data.children.insert(*index, *child);
                let child_data = nodes.get_mut(child).ok_or(Error::node_not_found(*child))?;
                child_data.parent = Some(*parent);
            }
            JournalEntry::RemoveChild {
                parent,
                child,
                index,
            } => {
                let parent_data = nodes.get_mut(parent).ok_or(Error::node_not_found(*parent))?;
                if parent_data.children.get(*index) != Some(child) {
                    return Err(Error::invalid_operation("child is not at the recorded index"));
                }
                parent_data.children.remove(*index);
                let child_data = nodes.get_mut(child).ok_or(Error::node_not_found(*child))?;
                child_data.parent = None;
            }
            JournalEntry::SetValue { node, new, .. } => {
                let data = nodes.get_mut(node).ok_or(Error::node_not_found(*node))?;
                data.value = new.clone();
            }
            JournalEntry::SetAttribute {
                node, name, new, ..
            } => {
                let data = nodes.get_mut(node).ok_or(Error::node_not_found(*node))?;
                match new {
                    Some(v) => {
                        data.attributes.insert(name.clone(), v.clone());
                    }
                    None => {
                        data.attributes.remove(name);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Journal holding the most recent committed mutation.
#[derive(Debug, Default)]
pub struct Journal {
    last: Option<JournalEntry>,
}

impl Journal {
    /// Creates a new empty journal.
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Applies an entry and records it as the most recent mutation.
    pub fn commit(&mut self, entry: JournalEntry, nodes: &mut NodeTable) -> Result<()> {
        entry.apply(nodes)?;
        self.last = Some(entry);
        Ok(())
    }

    /// Undoes the most recent mutation. Does nothing on an empty journal.
    pub fn undo(&self, nodes: &mut NodeTable) -> Result<()> {
        match &self.last {
            Some(entry) => entry.reverse().apply(nodes),
            None => Ok(()),
        }
    }

    /// Re-applies the most recent mutation after `undo`.
    pub fn redo(&self, nodes: &mut NodeTable) -> Result<()> {
        match &self.last {
            Some(entry) => entry.apply(nodes),
            None => Ok(()),
        }
    }

    /// Returns the most recent entry.
    pub fn last(&self) -> Option<&JournalEntry> {
        self.last.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> NodeTable {
        let mut nodes = NodeTable::new();
        nodes.insert(NodeId(0), NodeData::new("root"));
        nodes.insert(NodeId(1), NodeData::new("a"));
        nodes
    }

    #[test]
    fn test_entry_reverse() {
        let entry = JournalEntry::SetValue {
            node: NodeId(1),
            old: Some("2".into()),
            new: Some("5".into()),
        };
        let reversed = entry.reverse();
        assert_eq!(
            reversed,
            JournalEntry::SetValue {
                node: NodeId(1),
                old: Some("5".into()),
                new: Some("2".into()),
            }
        );
        assert_eq!(reversed.reverse(), entry);
    }

    #[test]
    fn test_commit_undo_redo() {
        let mut nodes = table();
        let mut journal = Journal::new();
        journal
            .commit(
                JournalEntry::AddChild {
                    parent: NodeId(0),
                    child: NodeId(1),
                    index: 0,
                },
                &mut nodes,
            )
            .unwrap();
        assert_eq!(nodes[&NodeId(0)].children, [NodeId(1)]);
        assert_eq!(nodes[&NodeId(1)].parent, Some(NodeId(0)));

        journal.undo(&mut nodes).unwrap();
        assert!(nodes[&NodeId(0)].children.is_empty());
        assert_eq!(nodes[&NodeId(1)].parent, None);

        journal.redo(&mut nodes).unwrap();
        assert_eq!(nodes[&NodeId(0)].children, [NodeId(1)]);
    }

    #[test]
    fn test_attribute_entry() {
        let mut nodes = table();
        let mut journal = Journal::new();
        journal
            .commit(
                JournalEntry::SetAttribute {
                    node: NodeId(1),
                    name: "id".into(),
                    old: None,
                    new: Some("x".into()),
                },
                &mut nodes,
            )
            .unwrap();
        assert_eq!(nodes[&NodeId(1)].attributes.get("id").map(|s| s.as_str()), Some("x"));
        journal.undo(&mut nodes).unwrap();
        assert!(nodes[&NodeId(1)].attributes.is_empty());
    }

    #[test]
    fn test_remove_rejects_wrong_index() {
        let mut nodes = table();
        let entry = JournalEntry::RemoveChild {
            parent: NodeId(0),
            child: NodeId(1),
            index: 0,
        };
        assert!(entry.apply(&mut nodes).is_err());
    }
}
