//! The sequence diff algorithm.
//!
//! A single left-to-right pass over both sequences. Each round first
//! consumes a run of matching elements, then resolves the mismatch at the
//! cursors with the fewest callbacks it can find:
//!
//! - a run of left elements absent from the rest of the right sequence is
//!   removed, a run of right elements absent from the rest of the left
//!   sequence is inserted, and when both exist at once they replace each
//!   other in place (remove first, then the deferred insert);
//! - when both cursor elements reappear further along the other sequence
//!   (a reorder), the shorter of "remove up to the match point" and
//!   "insert up to the match point" wins, removal on ties.
//!
//! Whatever is left of the right sequence becomes a trailing insert and
//! whatever is left of the left sequence a trailing remove.
//!
//! Positions handed to `remove` / `insert` are offsets into the left
//! sequence as it looks after all earlier callbacks were applied, obtained
//! from the running left index adjustment.

use crate::change::{Change, ChangeCollector};
use alloc::vec::Vec;

/// Equality predicate used to match left and right elements.
pub trait Matcher<T> {
    /// Returns true if `left` and `right` are the same element.
    fn matches(&self, left: &T, right: &T) -> bool;
}

/// Matches elements by `PartialEq`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ValueEq;

impl<T: PartialEq> Matcher<T> for ValueEq {
    #[inline]
    fn matches(&self, left: &T, right: &T) -> bool {
        left == right
    }
}

impl<T, F> Matcher<T> for F
where
    F: Fn(&T, &T) -> bool,
{
    #[inline]
    fn matches(&self, left: &T, right: &T) -> bool {
        self(left, right)
    }
}

/// Receives the runs found by `SequenceDiffer::diff`, in order.
pub trait DiffHandler<T> {
    /// `count` elements starting at `left_start` / `right_start` are equal.
    fn equal(&mut self, _left_start: usize, _right_start: usize, _count: usize) {}

    /// Remove `left[left_start..left_start + count]`, currently at position `at`.
    fn remove(&mut self, left: &[T], at: usize, left_start: usize, count: usize);

    /// Insert `right[right_start..right_start + count]` at position `at`.
    fn insert(&mut self, right: &[T], at: usize, right_start: usize, count: usize);
}

/// Computes minimal insert/remove runs between two ordered sequences.
#[derive(Clone, Debug, Default)]
pub struct SequenceDiffer<M = ValueEq> {
    matcher: M,
}

impl SequenceDiffer<ValueEq> {
    /// Creates a differ comparing elements by value.
    pub fn new() -> Self {
        Self { matcher: ValueEq }
    }
}

impl<M> SequenceDiffer<M> {
    /// Creates a differ with a custom matcher, e.g. identity comparison.
    pub fn with_matcher(matcher: M) -> Self {
        Self { matcher }
    }

    /// Diffs `left` against `right`, reporting runs to `handler`.
    pub fn diff<T, H>(&self, left: &[T], right: &[T], handler: &mut H)
    where
        M: Matcher<T>,
        H: DiffHandler<T>,
    {
        let mut li = 0usize;
        let mut ri = 0usize;
        // Net inserts minus removes so far; li + l_adjust is the live offset.
        let mut l_adjust: isize = 0;

        while li < left.len() && ri < right.len() {
            let (l_start, r_start) = (li, ri);
            while li < left.len() && ri < right.len() && self.matcher.matches(&left[li], &right[ri])
            {
                li += 1;
                ri += 1;
            }
            if li > l_start {
                handler.equal(l_start, r_start, li - l_start);
            }
            if li == left.len() || ri == right.len() {
                break;
            }

            let mut remove_count = self.missing_from_right(left, li, right, ri);
            let mut insert_count = self.missing_from_left(left, li, right, ri);

            if remove_count == 0 && insert_count == 0 {
                // Both cursor elements reappear later: pick the shorter detour.
                let to_left_match = self.next_left_match(left, li, &right[ri]);
                let to_right_match = self.next_right_match(&left[li], right, ri);
                if to_left_match <= to_right_match {
                    remove_count = to_left_match;
                } else {
                    insert_count = to_right_match;
                }
            }

            if remove_count > 0 {
                let at = offset(li, l_adjust);
                log::trace!("remove {} at {}", remove_count, at);
                handler.remove(left, at, li, remove_count);
                li += remove_count;
                l_adjust -= remove_count as isize;
            }
            if insert_count > 0 {
                let at = offset(li, l_adjust);
                log::trace!("insert {} at {}", insert_count, at);
                handler.insert(right, at, ri, insert_count);
                ri += insert_count;
                l_adjust += insert_count as isize;
            }
        }

        if ri < right.len() {
            handler.insert(right, offset(li, l_adjust), ri, right.len() - ri);
        }
        if li < left.len() {
            handler.remove(left, offset(li, l_adjust), li, left.len() - li);
        }
    }

    /// Diffs and collects every insert and remove as a `Change`.
    pub fn changes<T>(&self, left: &[T], right: &[T]) -> Vec<Change>
    where
        M: Matcher<T>,
    {
        let mut collector = ChangeCollector::default();
        self.diff(left, right, &mut collector);
        collector.changes
    }

    /// Length of the run starting at `li` whose elements do not occur in `right[ri..]`.
    fn missing_from_right<T>(&self, left: &[T], li: usize, right: &[T], ri: usize) -> usize
    where
        M: Matcher<T>,
    {
        left[li..]
            .iter()
            .take_while(|l| !right[ri..].iter().any(|r| self.matcher.matches(l, r)))
            .count()
    }

    /// Length of the run starting at `ri` whose elements do not occur in `left[li..]`.
    fn missing_from_left<T>(&self, left: &[T], li: usize, right: &[T], ri: usize) -> usize
    where
        M: Matcher<T>,
    {
        right[ri..]
            .iter()
            .take_while(|r| !left[li..].iter().any(|l| self.matcher.matches(l, r)))
            .count()
    }

    /// Distance from `li` to the next left element matching `target`.
    fn next_left_match<T>(&self, left: &[T], li: usize, target: &T) -> usize
    where
        M: Matcher<T>,
    {
        left[li..]
            .iter()
            .position(|l| self.matcher.matches(l, target))
            .unwrap_or(left.len() - li)
    }

    /// Distance from `ri` to the next right element matching `target`.
    fn next_right_match<T>(&self, target: &T, right: &[T], ri: usize) -> usize
    where
        M: Matcher<T>,
    {
        right[ri..]
            .iter()
            .position(|r| self.matcher.matches(target, r))
            .unwrap_or(right.len() - ri)
    }
}

#[inline]
fn offset(index: usize, adjust: isize) -> usize {
    (index as isize + adjust) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::apply_changes;
    use alloc::string::String;
    use alloc::vec;

    #[derive(Default)]
    struct Script {
        ops: Vec<String>,
    }

    impl DiffHandler<char> for Script {
        fn equal(&mut self, left_start: usize, _right_start: usize, count: usize) {
            self.ops.push(alloc::format!("={}+{}", left_start, count));
        }

        fn remove(&mut self, left: &[char], at: usize, left_start: usize, count: usize) {
            let run: String = left[left_start..left_start + count].iter().collect();
            self.ops.push(alloc::format!("-{}@{}", run, at));
        }

        fn insert(&mut self, right: &[char], at: usize, right_start: usize, count: usize) {
            let run: String = right[right_start..right_start + count].iter().collect();
            self.ops.push(alloc::format!("+{}@{}", run, at));
        }
    }

    fn script(left: &str, right: &str) -> Vec<String> {
        let l: Vec<char> = left.chars().collect();
        let r: Vec<char> = right.chars().collect();
        let mut s = Script::default();
        SequenceDiffer::new().diff(&l, &r, &mut s);
        s.ops
    }

    fn replay(left: &str, right: &str) -> String {
        let l: Vec<char> = left.chars().collect();
        let r: Vec<char> = right.chars().collect();
        let mut out = l.clone();
        apply_changes(&mut out, &r, &SequenceDiffer::new().changes(&l, &r));
        out.into_iter().collect()
    }

    #[test]
    fn test_identical_sequences() {
        assert_eq!(script("abcd", "abcd"), vec!["=0+4"]);
        assert!(script("", "").is_empty());
    }

    #[test]
    fn test_remove_then_append() {
        assert_eq!(script("abc", "acd"), vec!["=0+1", "-b@1", "=2+1", "+d@2"]);
        assert_eq!(
            SequenceDiffer::new().changes(&['a', 'b', 'c'], &['a', 'c', 'd']),
            vec![Change::remove(1, 1), Change::insert(2, 2, 1)]
        );
    }

    #[test]
    fn test_insert_between_bounds() {
        assert_eq!(script("ad", "abcd"), vec!["=0+1", "+bc@1", "=1+1"]);
    }

    #[test]
    fn test_single_swap_removes_then_inserts() {
        // Both detours are one element long; the tie goes to the removal.
        assert_eq!(
            script("abcd", "acbd"),
            vec!["=0+1", "-b@1", "=2+1", "+b@2", "=3+1"]
        );
        assert_eq!(replay("abcd", "acbd"), "acbd");
    }

    #[test]
    fn test_replace_in_place() {
        assert_eq!(script("axyd", "apd"), vec!["=0+1", "-xy@1", "+p@1", "=3+1"]);
    }

    #[test]
    fn test_reorder_prefers_shorter_detour() {
        // 'a' moves to the end: removing it is one step, inserting "bcd" would be three.
        assert_eq!(script("abcd", "bcda"), vec!["-a@0", "=1+3", "+a@3"]);
        // 'd' moves to the front: inserting it is cheaper than removing "abc".
        assert_eq!(script("abcd", "dabc"), vec!["+d@0", "=0+3", "-d@4"]);
    }

    #[test]
    fn test_empty_sides() {
        assert_eq!(script("", "ab"), vec!["+ab@0"]);
        assert_eq!(script("ab", ""), vec!["-ab@0"]);
    }

    #[test]
    fn test_replay_matches_right() {
        for (l, r) in [
            ("abc", "acd"),
            ("ad", "abcd"),
            ("abcdef", "fedcba"),
            ("aabbcc", "abcabc"),
            ("xyz", "abc"),
            ("abab", "baba"),
        ] {
            assert_eq!(replay(l, r), r, "{} -> {}", l, r);
        }
    }

    #[test]
    fn test_identity_matcher() {
        let a = String::from("x");
        let b = String::from("x");
        let left = [&a];
        let right = [&b];
        let by_identity = SequenceDiffer::with_matcher(|l: &&String, r: &&String| {
            core::ptr::eq(*l, *r)
        });
        assert_eq!(by_identity.changes(&left, &right).len(), 2);
        assert!(SequenceDiffer::new().changes(&left, &right).is_empty());
    }
}
