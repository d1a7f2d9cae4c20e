//! Minimal observability facade (SPEC_FULL §9 "observability facade"),
//! shaped after `spark-core::observability::ObservabilityFacade` but scaled
//! down to the three hooks this crate actually needs: hosts that want richer
//! metrics wire their own sink in by implementing this trait, without the
//! core depending on one concretely.

use std::sync::Arc;

use tracing::{debug, info};

/// Counter/gauge/log hooks a host can swap in for its own metrics sink.
pub trait ObservabilityFacade: Send + Sync + 'static {
    fn counter(&self, name: &str, value: u64);
    fn gauge(&self, name: &str, value: i64);
    fn log(&self, message: &str);
}

/// Default implementation: routes everything through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObservability;

impl ObservabilityFacade for TracingObservability {
    fn counter(&self, name: &str, value: u64) {
        debug!(counter = name, value, "observability counter");
    }

    fn gauge(&self, name: &str, value: i64) {
        debug!(gauge = name, value, "observability gauge");
    }

    fn log(&self, message: &str) {
        info!("{message}");
    }
}

pub type SharedObservability = Arc<dyn ObservabilityFacade>;

pub fn default_observability() -> SharedObservability {
    Arc::new(TracingObservability)
}
