//! Façade crate: `ClusterBuilder`, the running `Cluster`, configuration
//! loading, and the ring-fallback collaborator glue described in spec.md §6.
//! No protocol logic lives here — it all comes from `clustersync-core`,
//! wired to a real `tokio` TCP transport via `clustersync-transport-tcp`.

pub mod builder;
pub mod cluster;
pub mod error;
pub mod observability;
pub mod ring_fallback;
pub mod telemetry;

pub use builder::{ClusterBuilder, PeerAddr};
pub use cluster::Cluster;
pub use error::{ClusterSyncError, Result};
pub use observability::{default_observability, ObservabilityFacade, SharedObservability, TracingObservability};
pub use ring_fallback::LoopbackRingFallback;

// Re-export the pieces of `clustersync-core` a host typically needs without
// depending on that crate directly, mirroring the teacher's convention of a
// facade crate re-exporting its core crate's public surface.
pub use clustersync_core::{
    ClusterConfig, ConfigError, DispatchPolicy, IdSet, Member, MemberState, NodeId,
    NoopRingFallback, PeerConfig, Publication, PublicationFactory, RingFallbackTransport,
    SuccessRule, SyncAddress, SyncResult, TargetSelector, Topology, UserPublication,
    UserSyncCallback,
};
