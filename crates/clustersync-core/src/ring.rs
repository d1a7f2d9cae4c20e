//! The ring-fallback transport collaborator interface (spec §6).
//!
//! The core only emits events to this transport; its failure is
//! informational. A real implementation (framing, compression, per-hop
//! routing) lives outside the core, per spec §1's "external collaborators"
//! framing.

use async_trait::async_trait;

/// Best-effort broadcast transport for publications, addressed by channel.
#[async_trait]
pub trait RingFallbackTransport: Send + Sync {
    async fn broadcast(&self, channel: &str, payload: &[u8]);
}

/// Default no-op implementation for hosts that don't wire up a real
/// fallback transport.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRingFallback;

#[async_trait]
impl RingFallbackTransport for NoopRingFallback {
    async fn broadcast(&self, _channel: &str, _payload: &[u8]) {}
}
