//! Orchestrator-level scenarios from spec.md §8 (S2, S4, S5, S3), driven
//! against an in-process mock network rather than real sockets: a
//! `MockSession` routes `send` straight into the target node's
//! `ProtocolEngine::handle`, so these exercise the real dispatch/aware-set/
//! ring-forwarding code paths without a transport crate dependency.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clustersync_core::{
    AwarenessStore, DispatchPolicy, IdSet, Member, MemberState, MemberStore, PeerSession,
    ProtocolContext, ProtocolEngine, Publication, PublicationRegistry, Result, SessionProtocolState,
    SessionProvider, SyncContent, SyncEnvelope, SyncMode, SyncOrchestrator, TargetSelector,
    UserPublication,
};

/// One node's share of the mock cluster: its protocol context plus a handle
/// back to the shared network so nested ring orchestrators can resolve
/// sessions to other nodes the same way the top-level one does.
struct MockNode {
    ctx: ProtocolContext,
}

struct MockNetwork {
    nodes: Mutex<HashMap<i16, Arc<MockNode>>>,
}

impl MockNetwork {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(HashMap::new()),
        })
    }

    /// Builds a fully-meshed cluster of `ids`, each aware of every other
    /// id as a `VALID` member, and registers a node for each.
    fn add_node(self: &Arc<Self>, id: i16, peers: &[i16]) {
        let member_store = Arc::new(MemberStore::new(id));
        for &peer in peers.iter().chain(std::iter::once(&id)) {
            let mut m = Member::new(peer, "", 1);
            m.state = MemberState::Valid;
            member_store.update(m);
        }
        let ctx = ProtocolContext {
            local_id: id,
            member_store,
            awareness_store: Arc::new(AwarenessStore::new()),
            registry: Arc::new(PublicationRegistry::new()),
            local_key_chain: Arc::new(Vec::new()),
            in_startup: Arc::new(AtomicBool::new(false)),
            user_callback: None,
            sessions: Arc::clone(self) as Arc<dyn SessionProvider>,
        };
        self.nodes
            .lock()
            .unwrap()
            .insert(id, Arc::new(MockNode { ctx }));
    }

    fn node(&self, id: i16) -> Arc<MockNode> {
        Arc::clone(self.nodes.lock().unwrap().get(&id).expect("unknown mock node"))
    }

    fn awareness_of(&self, id: i16) -> Arc<AwarenessStore> {
        Arc::clone(&self.node(id).ctx.awareness_store)
    }
}

#[async_trait]
impl SessionProvider for MockNetwork {
    async fn session_for(&self, peer: i16) -> Result<Arc<dyn PeerSession>> {
        Ok(Arc::new(MockSession {
            from: -999, // overwritten per-call by the envelope's own sender_id
            to: peer,
            network: self.nodes.lock().unwrap().get(&peer).cloned(),
            reply: Mutex::new(None),
        }))
    }
}

/// Peers that should be treated as unreachable (simulating "node down").
struct MockSession {
    #[allow(dead_code)]
    from: i16,
    to: i16,
    network: Option<Arc<MockNode>>,
    reply: Mutex<Option<SyncEnvelope>>,
}

#[async_trait]
impl PeerSession for MockSession {
    fn peer_id(&self) -> Option<i16> {
        Some(self.to)
    }

    async fn send(&self, envelope: SyncEnvelope) -> Result<()> {
        let Some(node) = &self.network else {
            return Err(clustersync_core::SyncError::InvalidInput {
                reason: format!("node {} unreachable", self.to),
            });
        };
        let mut state = SessionProtocolState {
            initiated: false,
            startup_state_at_open: false,
        };
        let outcome = ProtocolEngine::handle(&node.ctx, &mut state, &envelope).await;
        *self.reply.lock().unwrap() = outcome.reply;
        Ok(())
    }

    async fn recv(&self) -> Result<SyncEnvelope> {
        self.reply
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| clustersync_core::SyncError::InvalidInput {
                reason: "mock session has no buffered reply".into(),
            })
    }

    async fn close(&self, _planned: bool) {}

    fn is_closed(&self) -> bool {
        false
    }
}

fn publication(key: &str, version: i64) -> Vec<Box<dyn Publication>> {
    vec![Box::new(UserPublication {
        channel: "c".into(),
        key: key.into(),
        version,
        bytes: b"x".to_vec(),
    })]
}

fn orchestrator_for(net: &Arc<MockNetwork>, id: i16) -> SyncOrchestrator {
    let node = net.node(id);
    SyncOrchestrator::new(
        id,
        Arc::clone(&node.ctx.member_store),
        Arc::clone(&node.ctx.awareness_store),
        Arc::clone(net) as Arc<dyn SessionProvider>,
        Arc::clone(&node.ctx.in_startup),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn s2_unicast_to_three_peers_one_down() {
    let net = MockNetwork::new();
    // Node 4 is deliberately left unregistered: sessions to it fail.
    net.add_node(1, &[2, 3, 4]);
    net.add_node(2, &[1, 3, 4]);
    net.add_node(3, &[1, 2, 4]);

    let orchestrator = orchestrator_for(&net, 1);
    let results = orchestrator
        .sync(
            DispatchPolicy::UnicastPlain,
            TargetSelector::include(IdSet::from_iter([2, 3, 4])),
            SyncMode::Message,
            publication("k", 10),
        )
        .await
        .unwrap();

    let result = &results["k"];
    assert!(result.successful);
    assert!(result.synced.contains(2));
    assert!(result.synced.contains(3));
    assert!(result.failed.contains(4));
}

#[tokio::test(flavor = "multi_thread")]
async fn s4_balance_avoids_redundant_transmission() {
    let net = MockNetwork::new();
    net.add_node(1, &[2, 3, 4]);
    net.add_node(2, &[1, 3, 4]);
    net.add_node(3, &[1, 2, 4]);
    net.add_node(4, &[1, 2, 3]);

    // `k`@v5 is already aware at {1,2,3}.
    net.awareness_of(1).update("k", 5, IdSet::from_iter([1, 2, 3]));

    let orchestrator = orchestrator_for(&net, 1);
    let results = orchestrator
        .sync(
            DispatchPolicy::UnicastBalance,
            TargetSelector::include(IdSet::from_iter([2, 3, 4])),
            SyncMode::Message,
            publication("k", 5),
        )
        .await
        .unwrap();

    let result = &results["k"];
    assert!(result.successful);
    assert!(result.failed.is_empty());
    assert!(result.synced.contains(4));
    assert!(!result.synced.contains(2));
    assert!(!result.synced.contains(3));
}

#[tokio::test(flavor = "multi_thread")]
async fn s5_quorum_succeeds_despite_one_failure() {
    let net = MockNetwork::new();
    net.add_node(1, &[2, 3, 4, 5]);
    net.add_node(2, &[1, 3, 4, 5]);
    net.add_node(3, &[1, 2, 4, 5]);
    net.add_node(4, &[1, 2, 3, 5]);
    // Node 5 is never registered: unreachable, simulating a mid-exchange
    // disconnect for the purposes of this dispatch-level scenario.

    let orchestrator = orchestrator_for(&net, 1);
    let results = orchestrator
        .sync(
            DispatchPolicy::UnicastQuorum,
            TargetSelector::include(IdSet::from_iter([2, 3, 4, 5])),
            SyncMode::Message,
            publication("k", 1),
        )
        .await
        .unwrap();

    let result = &results["k"];
    assert!(result.successful, "2*|failed|=2 < |targets|=4 should succeed");
    assert!(result.failed.contains(5));
}

#[tokio::test(flavor = "multi_thread")]
async fn s3_ring_forwards_to_every_peer() {
    let net = MockNetwork::new();
    net.add_node(1, &[2, 3, 4]);
    net.add_node(2, &[1, 3, 4]);
    net.add_node(3, &[1, 2, 4]);
    net.add_node(4, &[1, 2, 3]);

    let orchestrator = orchestrator_for(&net, 1);
    let results = orchestrator
        .sync(
            DispatchPolicy::RingPlain,
            TargetSelector::include(IdSet::from_iter([2, 3, 4])),
            SyncMode::Message,
            publication("k", 1),
        )
        .await
        .unwrap();

    // The ring result is reported against the initiator's orchestrator
    // call; the transitively-collected synced/failed sets arrive folded
    // back hop by hop (spec §4.5 step 8) as a single content keyed on the
    // final hop that actually had nobody left to forward to. The ring must
    // also *terminate*: expectedIds shrinks by the forwarding peer at each
    // hop, so this awaits to completion rather than cycling the 1-2-3-4
    // ring forever.
    let result = &results["k"];
    assert!(result.successful);
    assert!(result.synced.contains(4));
}
