//! Runtime-agnostic seams the protocol engine and orchestrator dispatch
//! through. Concrete I/O (TCP connect/listen, framed read/write, retry
//! backoff) is implemented by `clustersync-transport-tcp`; this crate only
//! depends on the traits below, never on a concrete runtime.

use async_trait::async_trait;

use crate::envelope::SyncEnvelope;
use crate::error::Result;
use crate::ids::NodeId;

/// A single peer session capable of exchanging framed `SyncEnvelope`s.
///
/// Implementors own exactly one underlying connection; sends are ordered,
/// and `close` is idempotent. The "planned close" flag suppresses failure
/// notification to the owning orchestrator (spec §3 "Lifecycle", §4.4).
#[async_trait]
pub trait PeerSession: Send + Sync {
    fn peer_id(&self) -> Option<NodeId>;

    async fn send(&self, envelope: SyncEnvelope) -> Result<()>;

    async fn recv(&self) -> Result<SyncEnvelope>;

    /// Closes the session. `planned == true` suppresses the `FAILED`/
    /// `UNPROPER` notification that an unplanned close would otherwise
    /// raise with the owning orchestrator.
    async fn close(&self, planned: bool);

    fn is_closed(&self) -> bool;
}

/// Resolves or creates sessions for target peers, used by the orchestrator
/// (spec §4.7 step 2: "build per-peer Sessions (create-or-reuse)").
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn session_for(&self, peer: NodeId) -> Result<std::sync::Arc<dyn PeerSession>>;
}
