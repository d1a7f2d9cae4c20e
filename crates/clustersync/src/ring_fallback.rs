//! Ring-fallback transport test double (SPEC_FULL §6), grounded on the
//! teacher's convention of shipping official `Noop`/`Mock` implementations
//! alongside the contracts they satisfy (`clustersync_core::NoopRingFallback`
//! is the production-default counterpart of this test-only one).

use std::sync::Mutex;

use async_trait::async_trait;
use clustersync_core::RingFallbackTransport;

/// Records every `broadcast` call in memory instead of sending anything,
/// for integration tests that need to assert the core emitted a fallback
/// broadcast without standing up a real ring transport.
#[derive(Default)]
pub struct LoopbackRingFallback {
    sent: Mutex<Vec<(String, Vec<u8>)>>,
}

impl LoopbackRingFallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.sent.lock().expect("loopback ring fallback mutex poisoned").clone()
    }
}

#[async_trait]
impl RingFallbackTransport for LoopbackRingFallback {
    async fn broadcast(&self, channel: &str, payload: &[u8]) {
        self.sent
            .lock()
            .expect("loopback ring fallback mutex poisoned")
            .push((channel.to_string(), payload.to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_broadcasts() {
        let fallback = LoopbackRingFallback::new();
        fallback.broadcast("chat", b"hello").await;
        let sent = fallback.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "chat");
        assert_eq!(sent[0].1, b"hello");
    }
}
