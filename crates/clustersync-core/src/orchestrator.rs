//! `SyncOrchestrator`: client-side driver that pushes publications out to
//! peers and aggregates the outcome (spec §4.7, §4.7.1).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::awareness::AwarenessStore;
use crate::content::SyncContent;
use crate::dispatch::{resolve_targets, DispatchPolicy, TargetSelector, Topology};
use crate::envelope::{MessageType, SyncEnvelope, SyncMode, SEQ_MAX};
use crate::error::{Result, SyncError};
use crate::ids::{IdSet, NodeId};
use crate::member::MemberStore;
use crate::membership_handler::MembershipSyncHandler;
use crate::publication::{MembershipPublication, Publication};
use crate::transport::{PeerSession, SessionProvider};

/// Outcome of synchronising one publication's key against its resolved
/// target set.
#[derive(Clone, Debug, Default)]
pub struct SyncResult {
    pub successful: bool,
    pub synced: IdSet,
    pub failed: IdSet,
}

/// Drives outbound synchronisation for a batch of publications under a
/// single [`DispatchPolicy`] (spec §4.7).
pub struct SyncOrchestrator {
    local_id: NodeId,
    member_store: Arc<MemberStore>,
    awareness_store: Arc<AwarenessStore>,
    sessions: Arc<dyn SessionProvider>,
    in_startup: Arc<AtomicBool>,
}

impl SyncOrchestrator {
    pub fn new(
        local_id: NodeId,
        member_store: Arc<MemberStore>,
        awareness_store: Arc<AwarenessStore>,
        sessions: Arc<dyn SessionProvider>,
        in_startup: Arc<AtomicBool>,
    ) -> Self {
        Self {
            local_id,
            member_store,
            awareness_store,
            sessions,
            in_startup,
        }
    }

    /// Synchronises `publications` under `policy`, returning one
    /// [`SyncResult`] per publication key.
    ///
    /// Balance variants (spec §4.7.1) are handled by grouping publications
    /// by their *unaware* target set and recursing once per group under the
    /// corresponding plain policy; everything else runs directly.
    pub async fn sync(
        &self,
        policy: DispatchPolicy,
        selector: TargetSelector,
        sync_mode: SyncMode,
        publications: Vec<Box<dyn Publication>>,
    ) -> Result<HashMap<String, SyncResult>> {
        if publications.is_empty() {
            return Err(SyncError::InvalidInput {
                reason: "sync() called with an empty publication list".into(),
            });
        }

        if policy.is_balance() {
            return self.sync_balanced(policy, selector, sync_mode, publications).await;
        }

        self.sync_plain(policy, &selector, sync_mode, publications).await
    }

    /// Spec §4.7.1: groups publications by their current unaware-target set
    /// (targets minus each publication's known-aware ids) and runs one
    /// plain-policy sub-dispatch per distinct group, so peers already aware
    /// of a value are never sent it again.
    async fn sync_balanced(
        &self,
        policy: DispatchPolicy,
        selector: TargetSelector,
        sync_mode: SyncMode,
        publications: Vec<Box<dyn Publication>>,
    ) -> Result<HashMap<String, SyncResult>> {
        let alive = self.member_store.snapshot();
        let base_targets = selector.resolve(&alive);

        let mut groups: HashMap<Vec<NodeId>, Vec<Box<dyn Publication>>> = HashMap::new();
        for p in publications {
            let aware = self.awareness_store.get_aware(p.key(), p.version());
            let unaware = base_targets.difference(&aware);
            groups.entry(unaware.to_slice().to_vec()).or_default().push(p);
        }

        let underlying = policy.underlying_plain();
        let mut results = HashMap::new();
        for (targets, group) in groups {
            if targets.is_empty() {
                for p in &group {
                    results.insert(
                        p.key().to_string(),
                        SyncResult {
                            successful: true,
                            synced: IdSet::new(),
                            failed: IdSet::new(),
                        },
                    );
                }
                continue;
            }
            let group_selector = TargetSelector::include(IdSet::from_iter(targets));
            let group_results = self.sync_plain(underlying, &group_selector, sync_mode, group).await?;
            results.extend(group_results);
        }
        Ok(results)
    }

    async fn sync_plain(
        &self,
        policy: DispatchPolicy,
        selector: &TargetSelector,
        sync_mode: SyncMode,
        publications: Vec<Box<dyn Publication>>,
    ) -> Result<HashMap<String, SyncResult>> {
        let alive = self.member_store.snapshot();
        let first_aware = self.awareness_store.get_aware(publications[0].key(), publications[0].version());
        let targets = resolve_targets(policy, selector, &alive, Some(&first_aware));

        let mut results: HashMap<String, SyncResult> = publications
            .iter()
            .map(|p| (p.key().to_string(), SyncResult::default()))
            .collect();

        if targets.is_empty() {
            for r in results.values_mut() {
                r.successful = true;
            }
            return Ok(results);
        }

        let mut envelope = self.build_envelope(policy, sync_mode, &publications);
        if policy.topology() == Topology::Ring {
            // Spec §4.3: "the initiator's envelope carries expectedIds = alive
            // snapshot ids on the first hop". Each forwarding hop recomputes
            // this from the *resolved* target set for that hop (see
            // `ring_forward_if_needed` in protocol.rs), not from the full
            // alive snapshot again, so the outstanding set actually shrinks
            // hop over hop instead of cycling the ring forever.
            envelope = envelope.with_expected_ids(targets.clone());
        }

        let dispatch_targets: Vec<NodeId> = match policy.topology() {
            Topology::Unicast => targets.iter().collect(),
            Topology::Ring => {
                crate::dispatch::ring_successor(&targets, &IdSet::new(), self.local_id)
                    .into_iter()
                    .collect()
            }
        };

        let mut per_peer_synced: HashMap<String, IdSet> = HashMap::new();
        let mut per_peer_failed: HashMap<String, IdSet> = HashMap::new();
        for (key, _) in &results {
            per_peer_synced.insert(key.clone(), IdSet::new());
            per_peer_failed.insert(key.clone(), IdSet::new());
        }

        for peer in &dispatch_targets {
            match self.exchange_with_peer(*peer, envelope.clone()).await {
                Ok(outcome) => {
                    for (key, ids) in outcome.synced {
                        let ids = if ids.is_empty() { IdSet::from_iter([*peer]) } else { ids };
                        if let Some(s) = per_peer_synced.get_mut(&key) {
                            s.union_with(&ids);
                        }
                    }
                    for (key, ids) in outcome.failed {
                        let ids = if ids.is_empty() { IdSet::from_iter([*peer]) } else { ids };
                        if let Some(f) = per_peer_failed.get_mut(&key) {
                            f.union_with(&ids);
                        }
                    }
                }
                Err(e) => {
                    warn!(peer, error = %e, "sync exchange failed");
                    for r in per_peer_failed.values_mut() {
                        r.add(*peer);
                    }
                }
            }
        }

        // Ring topology only ever wires up the first hop directly; the rest
        // of the ring's outcome arrives folded into that hop's reply via
        // nested orchestration (spec §4.5 step 8), but the success rule
        // still evaluates against the full resolved target set.
        let target_count = targets.size();
        let rule = policy.success_rule();
        for p in &publications {
            let key = p.key().to_string();
            let synced = per_peer_synced.remove(&key).unwrap_or_default();
            let failed = per_peer_failed.remove(&key).unwrap_or_default();
            let successful = rule.evaluate(target_count, synced.size(), failed.size());
            if successful {
                self.awareness_store.update(&key, p.version().max(1), synced.clone());
            }
            results.insert(
                key,
                SyncResult {
                    successful,
                    synced,
                    failed,
                },
            );
        }

        Ok(results)
    }

    fn build_envelope(
        &self,
        policy: DispatchPolicy,
        sync_mode: SyncMode,
        publications: &[Box<dyn Publication>],
    ) -> SyncEnvelope {
        let contents = publications
            .iter()
            .map(|p| {
                let aware = self.awareness_store.get_aware(p.key(), p.version());
                crate::content::SyncContent::new(p.key().to_string(), p.version(), aware, Some(p.serialize()))
            })
            .collect();

        SyncEnvelope::new(self.local_id, MessageType::Check, sync_mode, policy)
            .with_sequence(0)
            .with_in_startup(self.in_startup.load(Ordering::Acquire))
            .with_contents(contents)
    }

    /// Runs one client-side exchange against `peer`: send the envelope, then
    /// read back its reply, looping while the peer keeps replying
    /// `TYPE_CHECK` (spec §4.7 step 5, "mirror image" of the server's step
    /// 7/9). For `SYNC_CLUSTER` exchanges, each reply content is itself a
    /// `MembershipPublication` that must be merged into the local
    /// `MemberStore` the same way the server merges incoming ones — a plain
    /// peer like an ordinary `SYNC_MESSAGE` ack/failure would leave the
    /// client's own membership view never converging. Bounded by
    /// [`SEQ_MAX`] round trips.
    async fn exchange_with_peer(&self, peer: NodeId, envelope: SyncEnvelope) -> Result<ExchangeOutcome> {
        let session = self.sessions.session_for(peer).await?;
        let sent_keys: Vec<String> = envelope.contents.iter().map(|c| c.key.clone()).collect();
        let sync_mode = envelope.sync_mode;
        let sync_type = envelope.sync_type;

        session.send(envelope).await?;

        let mut outcome = ExchangeOutcome::default();
        let mut reply = session.recv().await?;

        loop {
            match reply.message_type {
                MessageType::Ok => {
                    for key in &sent_keys {
                        outcome.synced.entry(key.clone()).or_insert_with(IdSet::new);
                    }
                    session.close(true).await;
                    break;
                }
                MessageType::Check => {
                    let mut next_contents = Vec::new();
                    for c in &reply.contents {
                        if sync_mode == SyncMode::Cluster {
                            if let Some(payload) = &c.payload {
                                if let Ok(incoming) = MembershipPublication::deserialize(payload) {
                                    let responses = MembershipSyncHandler::handle(
                                        &self.member_store,
                                        &incoming,
                                        peer,
                                        reply.expected_ids.as_ref(),
                                    );
                                    for r in responses {
                                        next_contents.push(SyncContent::new(
                                            MembershipPublication::key_for(r.id),
                                            r.version,
                                            IdSet::new(),
                                            Some(r.serialize()),
                                        ));
                                    }
                                    continue;
                                }
                            }
                        }
                        // A ring-forward reply's aware_ids carries the real,
                        // transitively-aggregated set of synced/failed ids
                        // (spec §4.5 step 8); a direct peer reply carries
                        // none, so the caller falls back to crediting `peer`
                        // itself.
                        if c.is_failure() {
                            outcome.failed.insert(c.key.clone(), c.aware_ids.clone());
                        } else {
                            outcome.synced.insert(c.key.clone(), c.aware_ids.clone());
                        }
                    }

                    if sync_mode == SyncMode::Cluster {
                        // Membership replies are addressed per-member, never
                        // by echoing the sent key back, so the original keys
                        // are credited directly once the peer has responded
                        // without rejecting the exchange.
                        for key in &sent_keys {
                            outcome.synced.entry(key.clone()).or_insert_with(IdSet::new);
                        }
                    }

                    if reply.sequence >= SEQ_MAX || next_contents.is_empty() {
                        if reply.sequence >= SEQ_MAX && !next_contents.is_empty() {
                            // Round-trip cap hit (spec §4.7 step 6) before
                            // negotiation naturally finished: force-close and
                            // count every key sent this round toward failed,
                            // overriding whatever this round's per-content
                            // classification above produced for them.
                            for key in &sent_keys {
                                outcome.synced.remove(key);
                                outcome.failed.entry(key.clone()).or_insert_with(IdSet::new);
                            }
                        }
                        let closing = SyncEnvelope::new(self.local_id, MessageType::Ok, sync_mode, sync_type)
                            .with_sequence(reply.sequence.saturating_add(1));
                        session.send(closing).await?;
                        session.close(true).await;
                        break;
                    }

                    let next_seq = reply.sequence.saturating_add(1);
                    let next_envelope = SyncEnvelope::new(self.local_id, MessageType::Check, sync_mode, sync_type)
                        .with_sequence(next_seq)
                        .with_contents(next_contents);
                    session.send(next_envelope).await?;
                    reply = session.recv().await?;
                }
                other => {
                    debug!(peer, message_type = ?other, "peer rejected exchange");
                    for key in &sent_keys {
                        outcome.failed.insert(key.clone(), IdSet::new());
                    }
                    session.close(false).await;
                    break;
                }
            }
        }

        Ok(outcome)
    }
}

#[derive(Default)]
struct ExchangeOutcome {
    synced: HashMap<String, IdSet>,
    failed: HashMap<String, IdSet>,
}
