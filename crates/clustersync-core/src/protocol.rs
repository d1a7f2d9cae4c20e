//! `ProtocolEngine`: server-side handler for incoming `SyncEnvelope`s
//! (spec §4.5), and the shared content-processing function both the server
//! path and the orchestrator's reply-handling path (spec §4.7 step 5,
//! described as "mirror image" of step 7) build on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::awareness::AwarenessStore;
use crate::content::SyncContent;
use crate::dispatch::DispatchPolicy;
use crate::envelope::{MessageType, SyncEnvelope, SyncMode, SEQ_MAX};
use crate::error::{Result, SyncError};
use crate::ids::{IdSet, NodeId};
use crate::member::{MemberState, MemberStore};
use crate::membership_handler::MembershipSyncHandler;
use crate::orchestrator::SyncOrchestrator;
use crate::publication::{MembershipPublication, Publication, UserPublication};
use crate::registry::PublicationRegistry;
use crate::transport::SessionProvider;

/// User-supplied callback for `SYNC_MESSAGE` content (spec §4.5 step 7).
#[async_trait]
pub trait UserSyncCallback: Send + Sync {
    async fn on_publication(
        &self,
        peer: NodeId,
        publication: UserPublication,
        aware_ids: &IdSet,
        responses: &mut Vec<UserPublication>,
    );
}

/// Shared, cheaply-cloned state every session's protocol dispatch reads
/// from: the stores, the registry, and this node's own identity/startup
/// phase.
#[derive(Clone)]
pub struct ProtocolContext {
    pub local_id: NodeId,
    pub member_store: Arc<MemberStore>,
    pub awareness_store: Arc<AwarenessStore>,
    pub registry: Arc<PublicationRegistry>,
    pub local_key_chain: Arc<Vec<String>>,
    pub in_startup: Arc<AtomicBool>,
    pub user_callback: Option<Arc<dyn UserSyncCallback>>,
    pub sessions: Arc<dyn SessionProvider>,
}

impl ProtocolContext {
    pub fn leave_startup(&self) {
        self.in_startup.store(false, Ordering::Release);
    }

    pub fn is_in_startup(&self) -> bool {
        self.in_startup.load(Ordering::Acquire)
    }
}

/// Per-session state the handshake in spec §4.5 reads/writes.
#[derive(Default)]
pub struct SessionProtocolState {
    pub initiated: bool,
    pub startup_state_at_open: bool,
}

/// Outcome of dispatching one incoming envelope.
pub struct EngineOutcome {
    pub reply: Option<SyncEnvelope>,
    pub close_session: bool,
    pub planned_close: bool,
}

impl EngineOutcome {
    fn reply_and_close(reply: SyncEnvelope, planned: bool) -> Self {
        Self {
            reply: Some(reply),
            close_session: true,
            planned_close: planned,
        }
    }

    fn reply_only(reply: SyncEnvelope) -> Self {
        Self {
            reply: Some(reply),
            close_session: false,
            planned_close: false,
        }
    }

    fn close_only(planned: bool) -> Self {
        Self {
            reply: None,
            close_session: true,
            planned_close: planned,
        }
    }
}

fn bare_reply(ctx: &ProtocolContext, message_type: MessageType, sync_mode: SyncMode) -> SyncEnvelope {
    SyncEnvelope::new(ctx.local_id, message_type, sync_mode, DispatchPolicy::UnicastPlain)
}

pub struct ProtocolEngine;

impl ProtocolEngine {
    /// Dispatches one incoming envelope, per spec §4.5 steps 1-9.
    pub async fn handle(
        ctx: &ProtocolContext,
        session_state: &mut SessionProtocolState,
        m: &SyncEnvelope,
    ) -> EngineOutcome {
        // Step 1: clean close on TYPE_OK.
        if m.message_type == MessageType::Ok {
            return EngineOutcome::close_only(true);
        }

        // Step 2: simultaneous startup.
        if m.in_startup && session_state.startup_state_at_open {
            let reply = bare_reply(ctx, MessageType::BothStartup, m.sync_mode);
            return EngineOutcome::reply_and_close(reply, true);
        }

        // Step 3: malformed/bad envelopes and reserved codepoints.
        if matches!(
            m.message_type,
            MessageType::BadId | MessageType::BadSeq | MessageType::FailedRing
        ) || m.message_type.is_reserved()
            || m.sequence > SEQ_MAX
        {
            let reply = bare_reply(ctx, MessageType::BadSeq, m.sync_mode);
            return EngineOutcome::reply_and_close(reply, false);
        }

        // Step 4: first-message bookkeeping + superseded-key check.
        if !session_state.initiated {
            session_state.initiated = true;
            if let Some(chain) = &m.key_chain {
                if chain.iter().any(|k| ctx.local_key_chain.contains(k)) {
                    warn!(peer = m.sender_id, "peer presented a superseded key");
                    let reply = bare_reply(ctx, MessageType::BadKey, m.sync_mode);
                    return EngineOutcome::reply_and_close(reply, false);
                }
            }
        }

        // Step 5: resolve peer, reject unknown/invalid.
        let peer = ctx.member_store.get(m.sender_id);
        let peer = match peer {
            Some(p) if !matches!(p.state, MemberState::Invalid) => p,
            _ => {
                let reply = bare_reply(ctx, MessageType::NotValidEdge, m.sync_mode);
                return EngineOutcome::reply_and_close(reply, false);
            }
        };

        // Step 6: DOWN -> DELETED transition.
        if matches!(peer.state, MemberState::Down) {
            ctx.member_store.set_state(peer.id, MemberState::Deleted);
        }

        // Step 7/8: dispatch by mode, possibly forwarding via nested ring
        // orchestration.
        let outgoing = match m.sync_mode {
            SyncMode::Message => process_message_contents(ctx, m).await,
            SyncMode::Cluster => process_cluster_contents(ctx, m),
        };

        let outgoing = match ring_forward_if_needed(ctx, m, outgoing).await {
            Ok(contents) => contents,
            Err(_) => {
                let reply = bare_reply(ctx, MessageType::FailedRing, m.sync_mode);
                return EngineOutcome::reply_and_close(reply, false);
            }
        };

        // Step 9: reply.
        if outgoing.is_empty() {
            let reply = bare_reply(ctx, MessageType::Ok, m.sync_mode).with_sequence(0);
            EngineOutcome::reply_and_close(reply, true)
        } else {
            let mut reply = bare_reply(ctx, MessageType::Check, m.sync_mode)
                .with_sequence(m.sequence.saturating_add(1))
                .with_contents(outgoing);
            if m.expected_ids.is_some() && m.sequence == 0 {
                reply = reply.with_expected_ids(ctx.member_store.snapshot().alive_ids());
            }
            EngineOutcome::reply_only(reply)
        }
    }
}

/// Processes `SYNC_MESSAGE` contents via the user callback, producing
/// response `SyncContent`s (spec §4.5 step 7, first bullet).
async fn process_message_contents(ctx: &ProtocolContext, m: &SyncEnvelope) -> Vec<SyncContent> {
    let mut outgoing = Vec::new();
    for c in &m.contents {
        ctx.awareness_store
            .update(&c.key, c.version.max(1), {
                let mut ids = c.aware_ids.clone();
                ids.add(ctx.local_id);
                ids
            });

        let Some(payload) = &c.payload else { continue };

        let Some(callback) = &ctx.user_callback else {
            debug!(key = %c.key, "no user callback registered; dropping SYNC_MESSAGE content");
            continue;
        };

        let channel = UserPublication::deserialize_channel_hint(&c.key);
        let publication = match ctx.registry.instantiate(&channel, c.key.clone(), c.version, payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                warn!(key = %c.key, error = %e, "failed to instantiate publication for channel");
                continue;
            }
        };

        let mut responses = Vec::new();
        callback
            .on_publication(m.sender_id, publication, &c.aware_ids, &mut responses)
            .await;

        for response in responses {
            outgoing.push(SyncContent::new(
                c.key.clone(),
                response.version,
                c.aware_ids.clone(),
                Some(response.serialize()),
            ));
        }
    }
    outgoing
}

/// Processes `SYNC_CLUSTER` contents via `MembershipSyncHandler` (spec §4.5
/// step 7, second bullet).
fn process_cluster_contents(ctx: &ProtocolContext, m: &SyncEnvelope) -> Vec<SyncContent> {
    let mut outgoing = Vec::new();
    for c in &m.contents {
        let Some(payload) = &c.payload else { continue };
        let incoming = match MembershipPublication::deserialize(payload) {
            Ok(p) => p,
            Err(_) => continue,
        };

        let responses = MembershipSyncHandler::handle(
            &ctx.member_store,
            &incoming,
            m.sender_id,
            m.expected_ids.as_ref(),
        );

        for response in responses {
            let aware = ctx
                .member_store
                .get(response.id)
                .map(|mem| mem.aware_ids)
                .unwrap_or_default();
            outgoing.push(SyncContent::new(
                MembershipPublication::key_for(response.id),
                response.version,
                aware,
                Some(response.serialize()),
            ));
        }
    }
    outgoing
}

/// If `m.sync_type` is a ring variant, forwards the content to the rest of
/// the ring via a nested orchestrator and maps the aggregated `SyncResult`s
/// back into `SyncContent`s (spec §4.5 step 8). Otherwise passes `outgoing`
/// through unchanged.
async fn ring_forward_if_needed(
    ctx: &ProtocolContext,
    m: &SyncEnvelope,
    outgoing: Vec<SyncContent>,
) -> Result<Vec<SyncContent>> {
    if !matches!(
        m.sync_type,
        DispatchPolicy::RingPlain
            | DispatchPolicy::RingQuorum
            | DispatchPolicy::RingBalance
            | DispatchPolicy::RingBalanceQuorum
    ) {
        return Ok(outgoing);
    }

    // The outstanding set is the envelope's `expectedIds` (set by the
    // initiator on the first hop, and re-derived from each hop's resolved
    // targets thereafter — see `SyncOrchestrator::sync_plain`), minus the
    // peer that just forwarded to us and ourselves. Falling back to the
    // full alive snapshot only covers a malformed/legacy envelope that
    // never set `expectedIds`; a conforming initiator always does.
    let mut outstanding = m
        .expected_ids
        .clone()
        .unwrap_or_else(|| ctx.member_store.snapshot().alive_ids());
    outstanding.remove(m.sender_id);
    outstanding.remove(ctx.local_id);

    if outstanding.is_empty() {
        // Nobody left to forward to: the ring has drained (spec §8 property
        // 5). Reply with whatever this hop itself produced, same as a
        // non-ring exchange would.
        return Ok(outgoing);
    }

    let nested = SyncOrchestrator::new(
        ctx.local_id,
        Arc::clone(&ctx.member_store),
        Arc::clone(&ctx.awareness_store),
        Arc::clone(&ctx.sessions),
        Arc::clone(&ctx.in_startup),
    );

    let publications: Vec<Box<dyn Publication>> = m
        .contents
        .iter()
        .filter_map(|c| {
            c.payload.as_ref().map(|payload| -> Box<dyn Publication> {
                Box::new(UserPublication {
                    channel: UserPublication::deserialize_channel_hint(&c.key),
                    key: c.key.clone(),
                    version: c.version,
                    bytes: payload.clone(),
                })
            })
        })
        .collect();

    if publications.is_empty() {
        return Ok(outgoing);
    }

    let results = nested
        .sync(
            m.sync_type,
            crate::dispatch::TargetSelector::include(outstanding),
            m.sync_mode,
            publications,
        )
        .await?;

    let mut mapped = Vec::new();
    for (key, result) in results {
        if result.failed.is_empty() && result.synced.is_empty() {
            return Err(SyncError::FailedRing { key });
        }
        let mut ids = result.synced.clone();
        ids.union_with(&result.failed);
        mapped.push(SyncContent::new(key, if result.successful { 1 } else { 0 }, ids, None));
    }
    Ok(mapped)
}

impl UserPublication {
    /// Best-effort channel recovery for contents whose channel isn't
    /// carried on the wire (the wire format only carries `key`/`version`
    /// per `SyncContent`; the channel is established out of band when the
    /// orchestrator and protocol engine are wired to a single channel per
    /// publication type via the registry). Facade code that needs exact
    /// channel routing should prefer `PublicationRegistry::instantiate`.
    pub(crate) fn deserialize_channel_hint(key: &str) -> String {
        key.split('/').next().unwrap_or(key).to_string()
    }
}
