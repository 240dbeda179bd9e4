//! Change records produced by the differ.

use crate::differ::DiffHandler;
use alloc::vec::Vec;

/// A positioned insert or remove.
///
/// `left_index` is the position in the left sequence as it looks after all
/// preceding changes have been applied. `right_index` is the start of the
/// inserted run in the right sequence, or `None` for a removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Change {
    /// Position in the progressively mutated left sequence
    pub left_index: usize,
    /// Start of the inserted run in the right sequence, None for removals
    pub right_index: Option<usize>,
    /// Number of elements
    pub count: usize,
}

impl Change {
    /// Creates a removal record.
    #[inline]
    pub fn remove(left_index: usize, count: usize) -> Self {
        Self {
            left_index,
            right_index: None,
            count,
        }
    }

    /// Creates an insertion record.
    #[inline]
    pub fn insert(left_index: usize, right_index: usize, count: usize) -> Self {
        Self {
            left_index,
            right_index: Some(right_index),
            count,
        }
    }

    /// Returns true if this is a removal.
    #[inline]
    pub fn is_remove(&self) -> bool {
        self.right_index.is_none()
    }

    /// Returns true if this is an insertion.
    #[inline]
    pub fn is_insert(&self) -> bool {
        self.right_index.is_some()
    }
}

/// Handler that collects every insert and remove as a `Change`.
#[derive(Debug, Default)]
pub struct ChangeCollector {
    /// Collected changes in emission order
    pub changes: Vec<Change>,
}

impl<T> DiffHandler<T> for ChangeCollector {
    fn remove(&mut self, _left: &[T], at: usize, _left_start: usize, count: usize) {
        self.changes.push(Change::remove(at, count));
    }

    fn insert(&mut self, _right: &[T], at: usize, right_start: usize, count: usize) {
        self.changes.push(Change::insert(at, right_start, count));
    }
}

/// Applies changes, in order, to `left`, taking inserted elements from `right`.
pub fn apply_changes<T: Clone>(left: &mut Vec<T>, right: &[T], changes: &[Change]) {
    for change in changes {
        match change.right_index {
            None => {
                left.drain(change.left_index..change.left_index + change.count);
            }
            Some(start) => {
                let run = right[start..start + change.count].iter().cloned();
                left.splice(change.left_index..change.left_index, run);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_change_kind() {
        assert!(Change::remove(1, 1).is_remove());
        assert!(Change::insert(2, 0, 1).is_insert());
    }

    #[test]
    fn test_apply_changes() {
        let mut left = vec!['a', 'b', 'c'];
        let right = ['a', 'c', 'd'];
        apply_changes(
            &mut left,
            &right,
            &[Change::remove(1, 1), Change::insert(2, 2, 1)],
        );
        assert_eq!(left, right);
    }
}
