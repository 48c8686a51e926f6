//! Collection differ.
//!
//! Compares two snapshots of one collection by element identifier. Results
//! are positions into the input slices, so callers keep ownership of the
//! elements and can borrow them as they need.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// An element present in both snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Held {
    /// Position in `before`.
    pub before: usize,
    /// Position in `after`.
    pub after: usize,
}

impl Held {
    /// Check whether the element changed position.
    pub fn moved(&self) -> bool {
        self.before != self.after
    }
}

/// Outcome of comparing two collection snapshots.
///
/// `added`, `removed` and `held` are disjoint and together cover every
/// element of both inputs exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionDiff {
    /// Positions in `after` of elements not matched in `before`.
    pub added: Vec<usize>,
    /// Positions in `before` of elements not matched in `after`.
    pub removed: Vec<usize>,
    /// Matched elements.
    pub held: Vec<Held>,
}

impl CollectionDiff {
    /// `(position in after, new index)` for every added element and every
    /// held element whose index changed.
    pub fn index_changes(&self) -> Vec<(usize, usize)> {
        let mut changes: Vec<(usize, usize)> = self
            .added
            .iter()
            .map(|&after| (after, after))
            .chain(self.held.iter().filter(|h| h.moved()).map(|h| (h.after, h.after)))
            .collect();
        changes.sort_unstable();
        changes
    }

    /// Check whether nothing changed, positions included.
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.held.iter().all(|h| !h.moved())
    }
}

/// Compare `before` and `after` by key.
///
/// Elements whose key is `None` (not yet identified) count as added when in
/// `after` and are ignored in `before`. Repeated keys are matched by
/// multiplicity, in order: the n-th occurrence in `after` holds the n-th
/// occurrence in `before`. Runs in O(before + after).
pub fn diff<B, A, K, FB, FA>(before: &[B], after: &[A], before_key: FB, after_key: FA) -> CollectionDiff
where
    K: Eq + Hash,
    FB: Fn(&B) -> Option<K>,
    FA: Fn(&A) -> Option<K>,
{
    let mut pending: HashMap<K, VecDeque<usize>> = HashMap::with_capacity(before.len());
    for (position, element) in before.iter().enumerate() {
        if let Some(key) = before_key(element) {
            pending.entry(key).or_default().push_back(position);
        }
    }

    let mut result = CollectionDiff::default();
    for (position, element) in after.iter().enumerate() {
        let matched = after_key(element).and_then(|key| pending.get_mut(&key).and_then(VecDeque::pop_front));
        match matched {
            Some(before) => result.held.push(Held {
                before,
                after: position,
            }),
            None => result.added.push(position),
        }
    }

    result.removed = pending.into_values().flatten().collect();
    result.removed.sort_unstable();
    result
}
