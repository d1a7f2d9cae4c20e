//! `(publicationKey, version) -> IdSet` awareness tracking with
//! version-aware merge semantics (spec §4.2).

use dashmap::DashMap;

use crate::ids::IdSet;

/// Tracks, for every `(key, version)` pair, the set of node ids known to be
/// aware of that value.
///
/// Sharded by key via `DashMap` so that updates to unrelated keys never
/// contend, mirroring the teacher's `DashMap<Arc<str>, CallSession>` session
/// registry: fine-grained locking per key, not one global lock for the whole
/// table.
#[derive(Default)]
pub struct AwarenessStore {
    entries: DashMap<String, (i64, IdSet)>,
}

impl AwarenessStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Returns the aware-set known for `(key, version)`, or empty if unknown.
    pub fn get_aware(&self, key: &str, version: i64) -> IdSet {
        match self.entries.get(key) {
            Some(entry) if entry.0 == version => entry.1.clone(),
            _ => IdSet::new(),
        }
    }

    /// Returns the aware-set for whatever version is currently stored for
    /// `key`, along with that version, if any.
    pub fn get_latest(&self, key: &str) -> Option<(i64, IdSet)> {
        self.entries.get(key).map(|e| e.clone())
    }

    /// Monotonic merge per spec §4.2:
    /// - no entry: insert `(version, ids)`;
    /// - stored version < incoming: replace;
    /// - equal: union `ids` into stored;
    /// - stored version > incoming: drop (caller has stale information).
    pub fn update(&self, key: &str, version: i64, ids: IdSet) {
        match self.entries.get_mut(key) {
            None => {
                self.entries.insert(key.to_string(), (version, ids));
            }
            Some(mut entry) => {
                if version > entry.0 {
                    *entry = (version, ids);
                } else if version == entry.0 {
                    entry.1.union_with(&ids);
                }
                // version < entry.0: stale, dropped.
            }
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_key_returns_empty() {
        let store = AwarenessStore::new();
        assert!(store.get_aware("k", 1).is_empty());
    }

    #[test]
    fn higher_version_replaces() {
        let store = AwarenessStore::new();
        store.update("k", 1, IdSet::from_iter([1, 2]));
        store.update("k", 2, IdSet::from_iter([3]));
        assert!(store.get_aware("k", 1).is_empty());
        assert_eq!(store.get_aware("k", 2), IdSet::from_iter([3]));
    }

    #[test]
    fn equal_version_unions() {
        let store = AwarenessStore::new();
        store.update("k", 1, IdSet::from_iter([1]));
        store.update("k", 1, IdSet::from_iter([2]));
        assert_eq!(store.get_aware("k", 1), IdSet::from_iter([1, 2]));
    }

    #[test]
    fn stale_version_is_dropped() {
        let store = AwarenessStore::new();
        store.update("k", 5, IdSet::from_iter([1]));
        store.update("k", 3, IdSet::from_iter([99]));
        assert_eq!(store.get_aware("k", 5), IdSet::from_iter([1]));
        assert!(store.get_aware("k", 3).is_empty());
    }

    #[test]
    fn monotone_awareness_only_grows_at_same_version() {
        let store = AwarenessStore::new();
        for i in 0..10 {
            store.update("k", 1, IdSet::from_iter([i]));
        }
        assert_eq!(store.get_aware("k", 1).size(), 10);
    }
}
