//! Compact ordered set of 16-bit node identifiers.
//!
//! # Why
//! Aware-sets and dispatch targets are small (cluster sizes rarely exceed a
//! few hundred nodes) and are compared/unioned far more often than they are
//! mutated one element at a time. A sorted `Vec` gives us set semantics with
//! cache-friendly iteration and a trivial, order-independent `Eq`/`Hash`,
//! which a `HashSet<NodeId>` would not give us for free.

use core::fmt;
use std::hash::{Hash, Hasher};

/// A cluster node identifier. Values are constrained to `[0, 32767]`;
/// `-1` is reserved by the protocol to mean "unknown / request snapshot".
pub type NodeId = i16;

/// Sentinel `NodeId` meaning "unknown peer, send me your full membership view".
pub const UNKNOWN_NODE_ID: NodeId = -1;

/// An ordered, deduplicated set of [`NodeId`] values.
///
/// Equality and hashing depend only on membership, never on the order in
/// which ids were inserted: two `IdSet`s built by inserting the same ids in
/// different orders compare equal.
#[derive(Clone, Default)]
pub struct IdSet {
    ids: Vec<NodeId>,
}

impl IdSet {
    pub fn new() -> Self {
        Self { ids: Vec::new() }
    }

    pub fn from_iter(iter: impl IntoIterator<Item = NodeId>) -> Self {
        let mut set = Self::new();
        set.add_all(iter);
        set
    }

    /// Adds `id` to the set. Returns `true` if the set changed.
    pub fn add(&mut self, id: NodeId) -> bool {
        match self.ids.binary_search(&id) {
            Ok(_) => false,
            Err(pos) => {
                self.ids.insert(pos, id);
                true
            }
        }
    }

    pub fn add_all(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        for id in ids {
            self.add(id);
        }
    }

    /// Removes `id` from the set. Returns `true` if it was present.
    pub fn remove(&mut self, id: NodeId) -> bool {
        match self.ids.binary_search(&id) {
            Ok(pos) => {
                self.ids.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// Returns the union of `self` and `other` as a new `IdSet`.
    pub fn union(&self, other: &IdSet) -> IdSet {
        let mut merged = self.clone();
        merged.add_all(other.ids.iter().copied());
        merged
    }

    /// Unions `other` into `self` in place.
    pub fn union_with(&mut self, other: &IdSet) {
        self.add_all(other.ids.iter().copied());
    }

    /// Returns the set of ids in `self` but not in `other`.
    pub fn difference(&self, other: &IdSet) -> IdSet {
        IdSet {
            ids: self
                .ids
                .iter()
                .copied()
                .filter(|id| !other.contains(*id))
                .collect(),
        }
    }

    /// Returns the set of ids in both `self` and `other`.
    pub fn intersection(&self, other: &IdSet) -> IdSet {
        IdSet {
            ids: self
                .ids
                .iter()
                .copied()
                .filter(|id| other.contains(*id))
                .collect(),
        }
    }

    pub fn to_slice(&self) -> &[NodeId] {
        &self.ids
    }

    pub fn into_vec(self) -> Vec<NodeId> {
        self.ids
    }

    pub fn size(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.ids.iter().copied()
    }
}

impl FromIterator<NodeId> for IdSet {
    fn from_iter<T: IntoIterator<Item = NodeId>>(iter: T) -> Self {
        IdSet::from_iter(iter)
    }
}

impl IntoIterator for IdSet {
    type Item = NodeId;
    type IntoIter = std::vec::IntoIter<NodeId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.into_iter()
    }
}

impl PartialEq for IdSet {
    fn eq(&self, other: &Self) -> bool {
        // Both sides are maintained sorted+deduped, so a direct compare is a
        // correct set comparison regardless of insertion order.
        self.ids == other.ids
    }
}

impl Eq for IdSet {}

impl Hash for IdSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for id in &self.ids {
            id.hash(state);
        }
    }
}

impl fmt::Debug for IdSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ids.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_insertion_order() {
        let a = IdSet::from_iter([3, 1, 2]);
        let b = IdSet::from_iter([2, 3, 1]);
        assert_eq!(a, b);
    }

    #[test]
    fn union_and_difference() {
        let a = IdSet::from_iter([1, 2, 3]);
        let b = IdSet::from_iter([2, 3, 4]);
        assert_eq!(a.union(&b), IdSet::from_iter([1, 2, 3, 4]));
        assert_eq!(a.difference(&b), IdSet::from_iter([1]));
        assert_eq!(a.intersection(&b), IdSet::from_iter([2, 3]));
    }

    #[test]
    fn add_remove_contains() {
        let mut s = IdSet::new();
        assert!(s.add(5));
        assert!(!s.add(5));
        assert!(s.contains(5));
        assert!(s.remove(5));
        assert!(!s.contains(5));
        assert!(s.is_empty());
    }
}
