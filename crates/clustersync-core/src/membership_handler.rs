//! `MembershipSyncHandler`: the canonical `SYNC_CLUSTER` callback (spec §4.6).

use tracing::debug;

use crate::ids::{IdSet, NodeId, UNKNOWN_NODE_ID};
use crate::member::{Member, MemberState, MemberStore};
use crate::publication::{MembershipCommand, MembershipPublication};

/// Handles one incoming `MembershipPublication` against `store`, returning
/// the zero-or-more outgoing publications the protocol engine should wrap
/// into response `SyncContent`s.
pub struct MembershipSyncHandler;

impl MembershipSyncHandler {
    /// `sender_id` is the id of the peer that sent `incoming` (used to union
    /// into aware-sets on `OK`/`RCPT_THIS`). `expected_ids` carries the
    /// envelope's `expectedIds`, used when creating a brand-new member.
    pub fn handle(
        store: &MemberStore,
        incoming: &MembershipPublication,
        sender_id: NodeId,
        expected_ids: Option<&IdSet>,
    ) -> Vec<MembershipPublication> {
        if incoming.id == UNKNOWN_NODE_ID {
            return Self::handle_handshake_probe(store);
        }

        let local = store.get(incoming.id);

        match local {
            None => {
                let mut aware_ids = expected_ids.cloned().unwrap_or_default();
                aware_ids.add(store.self_id());

                let state = if incoming.command == MembershipCommand::DelThis {
                    MemberState::Deleted
                } else {
                    MemberState::Valid
                };

                let member = Member {
                    id: incoming.id,
                    sync_addresses: incoming.sync_addresses.clone(),
                    auth_by_key: incoming.auth_by_key,
                    key: incoming.key.clone(),
                    key_chain: Vec::new(),
                    last_modified: incoming.version,
                    state,
                    aware_ids,
                    scheduled: false,
                };
                store.update(member);
                vec![ok_reply(store.self_id(), incoming.version)]
            }
            Some(local) => Self::handle_existing(store, &local, incoming, sender_id),
        }
    }

    fn handle_handshake_probe(store: &MemberStore) -> Vec<MembershipPublication> {
        let snapshot = store.snapshot();
        snapshot
            .all
            .into_iter()
            .map(|m| {
                let command = if matches!(m.state, MemberState::Deleted) {
                    MembershipCommand::DelThis
                } else {
                    MembershipCommand::TakeThis
                };
                MembershipPublication::new(
                    m.id,
                    m.auth_by_key,
                    m.key,
                    m.last_modified,
                    m.sync_addresses,
                    command,
                )
            })
            .collect()
    }

    fn handle_existing(
        store: &MemberStore,
        local: &Member,
        incoming: &MembershipPublication,
        sender_id: NodeId,
    ) -> Vec<MembershipPublication> {
        match incoming.command {
            MembershipCommand::GiveThis => vec![full_record_reply(local)],

            MembershipCommand::DelThis => {
                if matches!(local.state, MemberState::Valid) {
                    if incoming.version > local.last_modified {
                        store.set_state(local.id, MemberState::Deleted);
                        let mut member = local.clone();
                        member.last_modified = incoming.version;
                        member.state = MemberState::Deleted;
                        store.update(member);
                        vec![ok_reply(store.self_id(), incoming.version)]
                    } else if incoming.version < local.last_modified {
                        vec![full_record_reply(local)]
                    } else {
                        // Equal version on a DEL_THIS for a still-valid
                        // record: treat as the delete winning, matching the
                        // ">" branch's intent without double-counting.
                        store.set_state(local.id, MemberState::Deleted);
                        vec![ok_reply(store.self_id(), incoming.version)]
                    }
                } else {
                    let mut ids = IdSet::new();
                    ids.add(sender_id);
                    store.union_aware_ids(local.id, &ids);
                    vec![ok_reply(store.self_id(), incoming.version)]
                }
            }

            MembershipCommand::TakeThis
            | MembershipCommand::Ok
            | MembershipCommand::RcptThis => {
                if incoming.version == local.last_modified {
                    let mut ids = IdSet::new();
                    if matches!(
                        incoming.command,
                        MembershipCommand::Ok | MembershipCommand::RcptThis
                    ) {
                        ids.add(sender_id);
                    }
                    store.union_aware_ids(local.id, &ids);

                    if incoming.command == MembershipCommand::TakeThis {
                        clear_scheduled(store, local.id);
                    }

                    let mut responses = Vec::new();
                    if incoming.command == MembershipCommand::RcptThis {
                        let refreshed = store.get(local.id).unwrap_or_else(|| local.clone());
                        responses.push(full_record_reply(&refreshed));
                    }
                    responses
                } else if incoming.version > local.last_modified {
                    if incoming.command == MembershipCommand::TakeThis {
                        let member = Member {
                            id: incoming.id,
                            sync_addresses: incoming.sync_addresses.clone(),
                            auth_by_key: incoming.auth_by_key,
                            key: incoming.key.clone(),
                            key_chain: local.key_chain.clone(),
                            last_modified: incoming.version,
                            state: MemberState::Valid,
                            aware_ids: local.aware_ids.clone(),
                            scheduled: false,
                        };
                        store.update(member);
                        vec![ok_reply(store.self_id(), incoming.version)]
                    } else {
                        vec![give_this_request(local)]
                    }
                } else {
                    debug!(id = local.id, "member has a newer record than peer sent; replying authoritative");
                    vec![full_record_reply(local)]
                }
            }
        }
    }
}

fn clear_scheduled(store: &MemberStore, id: NodeId) {
    if let Some(mut m) = store.get(id) {
        m.scheduled = false;
        store.update(m);
    }
}

fn ok_reply(self_id: NodeId, version: i64) -> MembershipPublication {
    MembershipPublication::new(
        self_id,
        false,
        String::new(),
        version,
        Vec::new(),
        MembershipCommand::Ok,
    )
}

fn full_record_reply(local: &Member) -> MembershipPublication {
    let command = if matches!(local.state, MemberState::Deleted) {
        MembershipCommand::DelThis
    } else {
        MembershipCommand::TakeThis
    };
    MembershipPublication::new(
        local.id,
        local.auth_by_key,
        local.key.clone(),
        local.last_modified,
        local.sync_addresses.clone(),
        command,
    )
}

fn give_this_request(local: &Member) -> MembershipPublication {
    MembershipPublication::new(
        local.id,
        local.auth_by_key,
        local.key.clone(),
        local.last_modified,
        local.sync_addresses.clone(),
        MembershipCommand::GiveThis,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_self(self_id: NodeId) -> MemberStore {
        MemberStore::new(self_id)
    }

    #[test]
    fn two_node_membership_sync_s1() {
        let node1 = store_with_self(1);
        node1.update(Member::new(1, "", 1));
        let node2 = store_with_self(2);
        node2.update(Member::new(2, "", 1));

        // Node 1 learns about node 2.
        let pub2 = MembershipPublication::new(2, false, "", 1, vec![], MembershipCommand::TakeThis);
        let responses = MembershipSyncHandler::handle(&node1, &pub2, 2, None);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].command, MembershipCommand::Ok);

        let m2 = node1.get(2).unwrap();
        assert!(matches!(m2.state, MemberState::Valid));
        assert!(m2.aware_ids.contains(1));
    }

    #[test]
    fn handshake_probe_lists_all_members_without_mutation() {
        let store = store_with_self(1);
        store.update(Member::new(1, "", 1));
        store.update(Member::new(2, "", 1));

        let probe = MembershipPublication::new(
            UNKNOWN_NODE_ID,
            false,
            "",
            0,
            vec![],
            MembershipCommand::GiveThis,
        );
        let responses = MembershipSyncHandler::handle(&store, &probe, 2, None);
        assert_eq!(responses.len(), 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn conflicting_versions_s6() {
        let store = store_with_self(1);
        let mut m7 = Member::new(7, "K1", 100);
        m7.key_chain = Vec::new();
        store.update(m7);

        let incoming =
            MembershipPublication::new(7, true, "K2", 150, vec![], MembershipCommand::TakeThis);
        let responses = MembershipSyncHandler::handle(&store, &incoming, 9, None);
        assert_eq!(responses[0].command, MembershipCommand::Ok);

        let stored = store.get(7).unwrap();
        assert_eq!(stored.last_modified, 150);
        assert_eq!(stored.key, "K2");
        assert!(stored.key_chain.contains(&"K1".to_string()));
    }

    #[test]
    fn del_this_on_newer_version_deletes() {
        let store = store_with_self(1);
        store.update(Member::new(7, "", 10));
        let del = MembershipPublication::new(7, false, "", 20, vec![], MembershipCommand::DelThis);
        let responses = MembershipSyncHandler::handle(&store, &del, 2, None);
        assert_eq!(responses[0].command, MembershipCommand::Ok);
        assert!(matches!(store.get(7).unwrap().state, MemberState::Deleted));
    }
}
