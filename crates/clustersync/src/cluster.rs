//! `Cluster`: the running instance a [`ClusterBuilder`](crate::builder::ClusterBuilder)
//! produces. Wires the core's stores and orchestrator to a live TCP listener
//! and session pool, and adds the ring-fallback broadcast spec §6 describes:
//! "for every released publication, a best-effort broadcast on a separate
//! connected-ring transport."

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clustersync_core::{
    AwarenessStore, DispatchPolicy, MemberStore, MembershipCommand, MembershipPublication, NodeId,
    Publication, PublicationRegistry, RingFallbackTransport, SessionProvider, SyncMode,
    SyncOrchestrator, SyncResult, TargetSelector, UserPublication, UNKNOWN_NODE_ID,
};
use clustersync_transport_tcp::SessionPool;
use tokio::task::JoinHandle;

use crate::error::{ClusterSyncError, Result};
use crate::observability::SharedObservability;

/// A live cluster member: bound listener, session pool, membership/awareness
/// stores, and the fallback broadcast transport, all sharing one identity.
pub struct Cluster {
    local_id: NodeId,
    local_addr: SocketAddr,
    member_store: Arc<MemberStore>,
    awareness_store: Arc<AwarenessStore>,
    registry: Arc<PublicationRegistry>,
    sessions: Arc<SessionPool>,
    in_startup: Arc<AtomicBool>,
    default_policy: DispatchPolicy,
    default_channel: Option<String>,
    ring_fallback: Arc<dyn RingFallbackTransport>,
    observability: SharedObservability,
    accept_task: JoinHandle<()>,
}

impl Cluster {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        local_id: NodeId,
        local_addr: SocketAddr,
        member_store: Arc<MemberStore>,
        awareness_store: Arc<AwarenessStore>,
        registry: Arc<PublicationRegistry>,
        sessions: Arc<SessionPool>,
        in_startup: Arc<AtomicBool>,
        default_policy: DispatchPolicy,
        default_channel: Option<String>,
        ring_fallback: Arc<dyn RingFallbackTransport>,
        observability: SharedObservability,
        accept_task: JoinHandle<()>,
    ) -> Self {
        Self {
            local_id,
            local_addr,
            member_store,
            awareness_store,
            registry,
            sessions,
            in_startup,
            default_policy,
            default_channel,
            ring_fallback,
            observability,
            accept_task,
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn member_store(&self) -> &Arc<MemberStore> {
        &self.member_store
    }

    pub fn awareness_store(&self) -> &Arc<AwarenessStore> {
        &self.awareness_store
    }

    pub fn registry(&self) -> &Arc<PublicationRegistry> {
        &self.registry
    }

    pub fn is_in_startup(&self) -> bool {
        self.in_startup.load(Ordering::Acquire)
    }

    /// Clears the startup flag so subsequent handshakes don't trigger the
    /// `BOTH_STARTUP` rejection (spec §4.5 step 3). Hosts call this once
    /// their own bootstrap sync against the configured peers has completed.
    pub fn leave_startup(&self) {
        self.in_startup.store(false, Ordering::Release);
    }

    /// Sends a handshake probe (spec §4.6, `id == -1`) to `selector`'s
    /// resolved peers under `SyncMode::Cluster`, merging each peer's full
    /// membership view into the local `MemberStore`. Hosts call this once at
    /// startup against their configured peers, then [`Self::leave_startup`]
    /// once it returns (spec §5 "Startup handshake").
    pub async fn bootstrap_membership(&self, selector: TargetSelector) -> Result<SyncResult> {
        let probe = MembershipPublication::new(
            UNKNOWN_NODE_ID,
            false,
            String::new(),
            0,
            Vec::new(),
            MembershipCommand::GiveThis,
        );
        let probe_key = MembershipPublication::key_for(UNKNOWN_NODE_ID);
        let boxed: Box<dyn Publication> = Box::new(probe);

        let mut results = self
            .orchestrator()
            .sync(DispatchPolicy::UnicastPlain, selector, SyncMode::Cluster, vec![boxed])
            .await
            .map_err(ClusterSyncError::from)?;

        results.remove(&probe_key).ok_or_else(|| ClusterSyncError::BuilderIncomplete {
            reason: "orchestrator returned no result for the membership handshake probe".into(),
        })
    }

    /// Spawns a background task that repeats the [`Self::bootstrap_membership`]
    /// handshake against `selector`'s resolved peers every `interval`. Not
    /// started automatically by the builder: spec.md's membership model
    /// relies on add/remove-by-announcement and has no mandated periodic
    /// behavior (§1 Non-goals, "dynamic cluster reconfiguration beyond
    /// add/remove-by-announcement"), so this is an opt-in convenience for
    /// hosts that want to re-converge after a peer was unreachable through
    /// an announcement. Typically driven by
    /// `ClusterConfig::rediscovery_interval`. The task runs until the
    /// returned handle is aborted or dropped.
    pub fn spawn_periodic_rediscovery(&self, selector: TargetSelector, interval: Duration) -> JoinHandle<()> {
        let local_id = self.local_id;
        let member_store = Arc::clone(&self.member_store);
        let awareness_store = Arc::clone(&self.awareness_store);
        let sessions = Arc::clone(&self.sessions);
        let in_startup = Arc::clone(&self.in_startup);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                let orchestrator = SyncOrchestrator::new(
                    local_id,
                    Arc::clone(&member_store),
                    Arc::clone(&awareness_store),
                    Arc::clone(&sessions) as Arc<dyn SessionProvider>,
                    Arc::clone(&in_startup),
                );
                let probe = MembershipPublication::new(
                    UNKNOWN_NODE_ID,
                    false,
                    String::new(),
                    0,
                    Vec::new(),
                    MembershipCommand::GiveThis,
                );
                let boxed: Box<dyn Publication> = Box::new(probe);
                let outcome = orchestrator
                    .sync(DispatchPolicy::UnicastPlain, selector.clone(), SyncMode::Cluster, vec![boxed])
                    .await;
                if let Err(e) = outcome {
                    tracing::debug!(error = %e, "periodic membership rediscovery failed");
                }
            }
        })
    }

    fn orchestrator(&self) -> SyncOrchestrator {
        SyncOrchestrator::new(
            self.local_id,
            Arc::clone(&self.member_store),
            Arc::clone(&self.awareness_store),
            Arc::clone(&self.sessions) as Arc<dyn SessionProvider>,
            Arc::clone(&self.in_startup),
        )
    }

    /// Publishes `payload` on `channel` under `policy`, dispatching to the
    /// resolved targets and then emitting a best-effort ring-fallback
    /// broadcast regardless of how the primary dispatch went (spec §6).
    pub async fn publish(
        &self,
        channel: &str,
        key: &str,
        version: i64,
        payload: Vec<u8>,
        policy: DispatchPolicy,
        selector: TargetSelector,
    ) -> Result<SyncResult> {
        let publication = UserPublication {
            channel: channel.to_string(),
            key: key.to_string(),
            version,
            bytes: payload.clone(),
        };

        let boxed: Box<dyn Publication> = Box::new(publication);
        let mut results = self
            .orchestrator()
            .sync(policy, selector, SyncMode::Message, vec![boxed])
            .await
            .map_err(ClusterSyncError::from)?;

        self.ring_fallback.broadcast(channel, &payload).await;
        self.observability.counter("clustersync.publications", 1);

        results.remove(key).ok_or_else(|| ClusterSyncError::BuilderIncomplete {
            reason: format!("orchestrator returned no result for key {key}"),
        })
    }

    /// Convenience wrapper around [`Self::publish`] using the builder's
    /// configured default channel and dispatch policy (spec §6 "a default
    /// publication type").
    pub async fn publish_default(&self, key: &str, version: i64, payload: Vec<u8>) -> Result<SyncResult> {
        let channel = self
            .default_channel
            .as_deref()
            .ok_or_else(|| ClusterSyncError::BuilderIncomplete {
                reason: "no default_channel configured on the builder".into(),
            })?
            .to_string();
        self.publish(&channel, key, version, payload, self.default_policy, TargetSelector::all())
            .await
    }

    /// Stops accepting new connections. Already-open sessions are left to
    /// close naturally; callers that need a hard stop should drop the
    /// `Cluster` itself (which aborts the accept task via `Drop`).
    pub fn stop_accepting(&self) {
        self.accept_task.abort();
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}
