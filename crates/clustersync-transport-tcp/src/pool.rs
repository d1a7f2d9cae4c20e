//! `SessionPool`: the `SessionProvider` the orchestrator dials through
//! (spec §4.7 step 2, "build per-peer Sessions (create-or-reuse)").
//!
//! Caches one live outbound `Session` per peer, resolving its address from
//! the shared `MemberStore` and dialing with backoff on demand. Grounded on
//! the same create-or-reuse caching shape as `spark-transport-tcp`'s
//! listener/channel pair, adapted since the teacher has no standalone
//! connection-pool type of its own (its channels are handed out by
//! whichever code calls `TcpChannel::connect` directly).
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clustersync_core::{MemberStore, NodeId, PeerSession, Result, SessionProvider};
use dashmap::DashMap;
use tracing::debug;

use crate::error::TransportError;
use crate::session::Session;

/// Dial parameters, mirroring `ClusterConfig`'s connect/backoff fields so
/// the pool doesn't need to depend on the facade crate.
#[derive(Clone, Copy, Debug)]
pub struct DialSettings {
    pub connect_timeout: Duration,
    pub backoff_base: Duration,
}

pub struct SessionPool {
    member_store: Arc<MemberStore>,
    dial: DialSettings,
    sessions: DashMap<NodeId, Arc<Session>>,
}

impl SessionPool {
    pub fn new(member_store: Arc<MemberStore>, dial: DialSettings) -> Self {
        Self {
            member_store,
            dial,
            sessions: DashMap::new(),
        }
    }

    /// Registers a session obtained via the accept path, so a peer that
    /// dials us first doesn't also get dialed out to.
    pub fn adopt(&self, peer: NodeId, session: Arc<Session>) {
        self.sessions.insert(peer, session);
    }

    fn cached_live(&self, peer: NodeId) -> Option<Arc<Session>> {
        let entry = self.sessions.get(&peer)?;
        if entry.is_closed() {
            None
        } else {
            Some(Arc::clone(&entry))
        }
    }
}

#[async_trait]
impl SessionProvider for SessionPool {
    async fn session_for(&self, peer: NodeId) -> Result<Arc<dyn PeerSession>> {
        if let Some(session) = self.cached_live(peer) {
            return Ok(session as Arc<dyn PeerSession>);
        }

        let member = self
            .member_store
            .get(peer)
            .ok_or(TransportError::NoAddress { peer })?;
        let addr = member
            .sync_addresses
            .first()
            .ok_or(TransportError::NoAddress { peer })?;
        let socket_addr = std::net::SocketAddr::new(addr.ip, addr.port);

        debug!(peer, %socket_addr, "dialing peer for new session");
        let session = Session::connect_with_backoff(
            peer,
            socket_addr,
            self.dial.connect_timeout,
            self.dial.backoff_base,
        )
        .await?;
        let session = Arc::new(session);
        self.sessions.insert(peer, Arc::clone(&session));
        Ok(session as Arc<dyn PeerSession>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clustersync_core::Member;

    fn settings() -> DialSettings {
        DialSettings {
            connect_timeout: Duration::from_millis(100),
            backoff_base: Duration::from_millis(1),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn session_for_unknown_peer_fails_fast() {
        let store = Arc::new(MemberStore::new(1));
        let pool = SessionPool::new(store, settings());
        let err = pool.session_for(99).await.unwrap_err();
        assert!(matches!(err, clustersync_core::SyncError::Transport { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn session_for_peer_with_no_address_fails_fast() {
        let store = Arc::new(MemberStore::new(1));
        store.update(Member::new(2, "K", 1));
        let pool = SessionPool::new(store, settings());
        let err = pool.session_for(2).await.unwrap_err();
        assert!(matches!(err, clustersync_core::SyncError::Transport { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn adopted_session_is_reused() {
        let store = Arc::new(MemberStore::new(1));
        let pool = SessionPool::new(store, settings());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(
            tokio::net::TcpStream::connect(local_addr),
            listener.accept()
        );
        let client_session = Arc::new(Session::from_stream(client.unwrap(), Some(2)).unwrap());
        let (server_stream, _) = server.unwrap();
        let _server_session = Session::from_stream(server_stream, Some(1)).unwrap();

        pool.adopt(2, Arc::clone(&client_session));
        let resolved = pool.session_for(2).await.unwrap();
        assert_eq!(resolved.peer_id(), Some(2));
        assert!(!resolved.is_closed());
    }
}
