//! Exact node-set deltas.
//!
//! The old and new node-sets are diffed by node identity. Each run becomes
//! an insert or remove notification carrying a working copy of the
//! node-set patched up to that step: removals see the set before the
//! removal, insertions the set after it. The working copy is local to one
//! call, so a listener that mutates the tree and triggers a nested
//! notification cannot disturb it.

use crate::listener::Notification;
use alloc::vec::Vec;
use arbor_core::NodeId;
use arbor_diff::{DiffHandler, SequenceDiffer};

struct DeltaBuilder {
    nodes: Vec<NodeId>,
    out: Vec<Notification>,
}

impl DiffHandler<NodeId> for DeltaBuilder {
    fn remove(&mut self, _left: &[NodeId], at: usize, _left_start: usize, count: usize) {
        self.out.push(Notification::Remove {
            nodes: self.nodes.clone(),
            start: at,
            count,
        });
        self.nodes.drain(at..at + count);
    }

    fn insert(&mut self, right: &[NodeId], at: usize, right_start: usize, count: usize) {
        self.nodes
            .splice(at..at, right[right_start..right_start + count].iter().copied());
        self.out.push(Notification::Insert {
            nodes: self.nodes.clone(),
            start: at,
            count,
        });
    }
}

/// Computes the insert and remove notifications turning `old` into `new`.
pub fn delta(old: &[NodeId], new: &[NodeId]) -> Vec<Notification> {
    let mut builder = DeltaBuilder {
        nodes: old.to_vec(),
        out: Vec::new(),
    };
    SequenceDiffer::with_matcher(|a: &NodeId, b: &NodeId| a == b).diff(old, new, &mut builder);
    debug_assert_eq!(builder.nodes, new);
    builder.out
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    const A: NodeId = NodeId(1);
    const B: NodeId = NodeId(2);
    const C: NodeId = NodeId(3);
    const D: NodeId = NodeId(4);

    #[test]
    fn test_remove_then_insert() {
        let out = delta(&[A, B, C], &[A, C, D]);
        assert_eq!(
            out,
            vec![
                Notification::Remove {
                    nodes: vec![A, B, C],
                    start: 1,
                    count: 1
                },
                Notification::Insert {
                    nodes: vec![A, C, D],
                    start: 2,
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn test_from_empty_is_single_insert() {
        assert_eq!(
            delta(&[], &[A, B]),
            vec![Notification::Insert {
                nodes: vec![A, B],
                start: 0,
                count: 2
            }]
        );
        assert!(delta(&[A, B], &[A, B]).is_empty());
    }

    #[test]
    fn test_boundary_insert_is_contiguous() {
        assert_eq!(
            delta(&[A, D], &[A, B, C, D]),
            vec![Notification::Insert {
                nodes: vec![A, B, C, D],
                start: 1,
                count: 2
            }]
        );
    }
}
