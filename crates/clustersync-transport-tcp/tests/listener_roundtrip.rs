//! End-to-end smoke test: a listener-driven `ProtocolEngine` accepts a
//! connection and replies to a `SYNC_CLUSTER` envelope.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clustersync_core::{
    DispatchPolicy, Member, MemberState, MemberStore, AwarenessStore, MessageType, NodeId,
    ProtocolContext, PublicationRegistry, SyncContent, SyncEnvelope, SyncMode, IdSet,
};
use clustersync_transport_tcp::{DialSettings, Listener, Session, SessionPool};

fn dial_settings() -> DialSettings {
    DialSettings {
        connect_timeout: Duration::from_millis(500),
        backoff_base: Duration::from_millis(10),
    }
}

async fn build_context(local_id: NodeId, peer_store: Arc<MemberStore>) -> ProtocolContext {
    let pool = Arc::new(SessionPool::new(Arc::clone(&peer_store), dial_settings()));
    ProtocolContext {
        local_id,
        member_store: peer_store,
        awareness_store: Arc::new(AwarenessStore::new()),
        registry: Arc::new(PublicationRegistry::new()),
        local_key_chain: Arc::new(Vec::new()),
        in_startup: Arc::new(AtomicBool::new(false)),
        user_callback: None,
        sessions: pool,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_membership_reply_is_ok_with_empty_contents() {
    let server_store = Arc::new(MemberStore::new(1));
    server_store.update(Member::new(2, "shared", 1));
    server_store.set_state(2, MemberState::Valid);

    let ctx = build_context(1, server_store).await;
    let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = listener.local_addr();
    let pool = Arc::new(SessionPool::new(Arc::new(MemberStore::new(2)), dial_settings()));
    tokio::spawn(listener.serve(ctx, pool));

    let client = Session::connect_with_backoff(
        1,
        addr,
        Duration::from_millis(500),
        Duration::from_millis(10),
    )
    .await
    .unwrap();

    let request = SyncEnvelope::new(2, MessageType::Check, SyncMode::Cluster, DispatchPolicy::UnicastPlain)
        .with_sequence(0)
        .with_contents(vec![]);

    clustersync_core::PeerSession::send(&client, request).await.unwrap();
    let reply = clustersync_core::PeerSession::recv(&client).await.unwrap();

    assert_eq!(reply.message_type.as_u8(), MessageType::Ok.as_u8());
    assert!(reply.contents.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_peer_is_rejected_with_not_valid_edge() {
    let server_store = Arc::new(MemberStore::new(1));
    let ctx = build_context(1, server_store).await;
    let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = listener.local_addr();
    let pool = Arc::new(SessionPool::new(Arc::new(MemberStore::new(2)), dial_settings()));
    tokio::spawn(listener.serve(ctx, pool));

    let client = Session::connect_with_backoff(
        1,
        addr,
        Duration::from_millis(500),
        Duration::from_millis(10),
    )
    .await
    .unwrap();

    let request = SyncEnvelope::new(99, MessageType::Check, SyncMode::Cluster, DispatchPolicy::UnicastPlain)
        .with_sequence(0)
        .with_contents(vec![SyncContent::ack("k", 1, IdSet::new())]);

    clustersync_core::PeerSession::send(&client, request).await.unwrap();
    let reply = clustersync_core::PeerSession::recv(&client).await.unwrap();

    assert_eq!(reply.message_type.as_u8(), MessageType::NotValidEdge.as_u8());
}
