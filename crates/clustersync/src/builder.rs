//! `ClusterBuilder`: the builder surface spec.md §6 describes, expressed as
//! a parameter-object whose required fields are tracked until `build()`
//! validates them in one pass (spec §9 "mutable enum-keyed state-machine
//! flag" redesign note), rather than the bitset-of-required-state-flags the
//! original design used.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clustersync_core::{
    AwarenessStore, DispatchPolicy, IdSet, Member, MemberStore, NodeId, ProtocolContext,
    PublicationRegistry, UserPublication, UserSyncCallback,
};
use clustersync_transport_tcp::{DialSettings, Listener, SessionPool};

use clustersync_core::NoopRingFallback;

use crate::cluster::Cluster;
use crate::error::{ClusterSyncError, Result};
use crate::observability::{default_observability, SharedObservability};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(5);

/// One statically-known peer, as accepted by the builder (spec §6 "peer
/// addresses").
#[derive(Clone, Debug)]
pub struct PeerAddr {
    pub id: NodeId,
    pub addr: SocketAddr,
}

/// Builder for a running [`Cluster`]. Required fields (`local_id`,
/// `listen_addr`) have no usable default and are tracked as `Option` until
/// `build()` validates the whole set in one pass.
pub struct ClusterBuilder {
    local_id: Option<NodeId>,
    listen_addr: Option<SocketAddr>,
    peers: Vec<PeerAddr>,
    shared_key: String,
    default_policy: DispatchPolicy,
    default_channel: Option<String>,
    subscriptions: HashMap<String, Arc<dyn UserSyncCallback>>,
    registry: PublicationRegistry,
    ring_fallback: Option<Arc<dyn clustersync_core::RingFallbackTransport>>,
    observability: Option<SharedObservability>,
    connect_timeout: Duration,
    backoff_base: Duration,
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self {
            local_id: None,
            listen_addr: None,
            peers: Vec::new(),
            shared_key: String::new(),
            default_policy: DispatchPolicy::UnicastPlain,
            default_channel: None,
            subscriptions: HashMap::new(),
            registry: PublicationRegistry::new(),
            ring_fallback: None,
            observability: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl ClusterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a builder from a validated [`ClusterConfig`]
    /// (`clustersync_core::ClusterConfig`), the way a host loading its
    /// settings from TOML via [`ClusterConfig::from_toml`] wires them into a
    /// running cluster. Per-call builder methods (`peer`, `subscribe`, ...)
    /// still compose normally afterward.
    pub fn from_config(cfg: &clustersync_core::ClusterConfig) -> Result<Self> {
        cfg.validate().map_err(ClusterSyncError::Config)?;
        let mut builder = Self::new()
            .local_id(cfg.self_id)
            .listen_addr(SocketAddr::new(cfg.bind_host, cfg.bind_port))
            .shared_key(cfg.key.clone())
            .connect_timeout(cfg.connect_timeout())
            .backoff(cfg.backoff_base());
        for peer in &cfg.peers {
            builder = builder.peer(peer.id, SocketAddr::new(peer.host, peer.port));
        }
        Ok(builder)
    }

    pub fn local_id(mut self, id: NodeId) -> Self {
        self.local_id = Some(id);
        self
    }

    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = Some(addr);
        self
    }

    pub fn peer(mut self, id: NodeId, addr: SocketAddr) -> Self {
        self.peers.push(PeerAddr { id, addr });
        self
    }

    pub fn shared_key(mut self, key: impl Into<String>) -> Self {
        self.shared_key = key.into();
        self
    }

    pub fn default_policy(mut self, policy: DispatchPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// The channel `Cluster::publish_default` addresses when the caller
    /// doesn't name one explicitly (spec §6 "a default publication type").
    pub fn default_channel(mut self, channel: impl Into<String>) -> Self {
        self.default_channel = Some(channel.into());
        self
    }

    /// Registers a `(channel, handler)` subscription (spec §6). The handler
    /// is invoked for `SYNC_MESSAGE` content on `channel`; publications are
    /// reconstructed from raw bytes via `register_passthrough` unless a more
    /// specific factory is registered through [`Self::publication_factory`].
    pub fn subscribe(mut self, channel: impl Into<String>, handler: Arc<dyn UserSyncCallback>) -> Self {
        let channel = channel.into();
        self.registry.register_passthrough(&channel);
        self.subscriptions.insert(channel, handler);
        self
    }

    /// Registers a non-default instantiation factory for `channel`,
    /// overriding the passthrough factory `subscribe` installs.
    pub fn publication_factory(
        self,
        channel: impl Into<String>,
        factory: clustersync_core::PublicationFactory,
    ) -> Self {
        self.registry.register(channel, factory);
        self
    }

    pub fn ring_fallback(mut self, transport: Arc<dyn clustersync_core::RingFallbackTransport>) -> Self {
        self.ring_fallback = Some(transport);
        self
    }

    pub fn observability(mut self, observability: SharedObservability) -> Self {
        self.observability = Some(observability);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn backoff(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Builds a [`ClusterConfig`](clustersync_core::ClusterConfig)-derived
    /// cluster: binds the listener, wires stores/registry/sessions together,
    /// and spawns the accept loop. Returns once the listener is bound;
    /// membership/startup handshakes happen asynchronously afterward.
    pub async fn build(self) -> Result<Cluster> {
        let local_id = self.local_id.ok_or_else(|| ClusterSyncError::BuilderIncomplete {
            reason: "local_id is required".into(),
        })?;
        let listen_addr = self.listen_addr.ok_or_else(|| ClusterSyncError::BuilderIncomplete {
            reason: "listen_addr is required".into(),
        })?;

        let member_store = Arc::new(MemberStore::new(local_id));
        let mut local = Member::new(local_id, self.shared_key.clone(), now_millis());
        local.sync_addresses = vec![clustersync_core::SyncAddress {
            ip: listen_addr.ip(),
            port: listen_addr.port(),
        }];
        member_store.update(local);

        for peer in &self.peers {
            let mut member = Member::new(peer.id, String::new(), 0);
            member.sync_addresses = vec![clustersync_core::SyncAddress {
                ip: peer.addr.ip(),
                port: peer.addr.port(),
            }];
            member_store.update(member);
        }

        let awareness_store = Arc::new(AwarenessStore::new());
        let registry = Arc::new(self.registry);
        let in_startup = Arc::new(AtomicBool::new(true));

        let dial = DialSettings {
            connect_timeout: self.connect_timeout,
            backoff_base: self.backoff_base,
        };
        let sessions = Arc::new(SessionPool::new(Arc::clone(&member_store), dial));

        let user_callback: Arc<dyn UserSyncCallback> = Arc::new(ChannelDispatchCallback {
            subscriptions: self.subscriptions,
        });

        let ctx = ProtocolContext {
            local_id,
            member_store: Arc::clone(&member_store),
            awareness_store: Arc::clone(&awareness_store),
            registry: Arc::clone(&registry),
            local_key_chain: Arc::new(Vec::new()),
            in_startup: Arc::clone(&in_startup),
            user_callback: Some(user_callback),
            sessions: sessions.clone() as Arc<dyn clustersync_core::SessionProvider>,
        };

        let listener = Listener::bind(listen_addr).await.map_err(ClusterSyncError::Bind)?;
        let bound_addr = listener.local_addr();

        let serve_ctx = ctx.clone();
        let serve_pool = Arc::clone(&sessions);
        let accept_task = tokio::spawn(async move {
            if let Err(e) = listener.serve(serve_ctx, serve_pool).await {
                tracing::warn!(error = %e, "listener accept loop exited");
            }
        });

        Ok(Cluster::new(
            local_id,
            bound_addr,
            member_store,
            awareness_store,
            registry,
            sessions,
            in_startup,
            self.default_policy,
            self.default_channel,
            self.ring_fallback.unwrap_or_else(|| Arc::new(NoopRingFallback)),
            self.observability.unwrap_or_else(default_observability),
            accept_task,
        ))
    }
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Fans incoming `SYNC_MESSAGE` content out to the `(channel, handler)`
/// subscription registered for its channel (spec §6); channels without a
/// subscriber are dropped with no response, matching the protocol engine's
/// existing "no callback registered" path.
struct ChannelDispatchCallback {
    subscriptions: HashMap<String, Arc<dyn UserSyncCallback>>,
}

#[async_trait]
impl UserSyncCallback for ChannelDispatchCallback {
    async fn on_publication(
        &self,
        peer: NodeId,
        publication: UserPublication,
        aware_ids: &IdSet,
        responses: &mut Vec<UserPublication>,
    ) {
        let Some(handler) = self.subscriptions.get(publication.channel.as_str()) else {
            tracing::debug!(channel = %publication.channel, "no subscriber for channel; dropping");
            return;
        };
        handler.on_publication(peer, publication, aware_ids, responses).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clustersync_core::ClusterConfig;

    #[tokio::test(flavor = "multi_thread")]
    async fn from_config_wires_fields_and_builds() {
        let cfg = ClusterConfig::from_toml(
            r#"
                self_id = 1
                bind_host = "127.0.0.1"
                bind_port = 0

                [[peers]]
                id = 2
                host = "127.0.0.1"
                port = 7777
            "#,
        )
        .unwrap();

        let cluster = ClusterBuilder::from_config(&cfg).unwrap().build().await.unwrap();
        assert_eq!(cluster.local_id(), 1);
        assert_eq!(cluster.member_store().get(2).unwrap().sync_addresses[0].port, 7777);
    }

    #[test]
    fn from_config_rejects_invalid_config() {
        let cfg = ClusterConfig::from_toml(
            r#"
                self_id = 1
                bind_host = "127.0.0.1"
                bind_port = 7000

                [[peers]]
                id = 1
                host = "127.0.0.1"
                port = 7001
            "#,
        )
        .unwrap();

        assert!(ClusterBuilder::from_config(&cfg).is_err());
    }
}
