//! `ClusterSyncError`: the facade-level error domain, aggregating the three
//! crate-local error types raised below it (spec §7, SPEC_FULL §2 AMBIENT).
//!
//! Mirrors `spark-switch::error::SwitchError`'s `From<SwitchError> for
//! SparkError` pattern: lower layers keep their own structured error enum,
//! and the facade only adds a thin `From` impl per layer rather than a
//! re-exported superset of variants.

use thiserror::Error;

use clustersync_core::{ConfigError, SyncError};
use clustersync_transport_tcp::TransportError;

#[derive(Debug, Error)]
pub enum ClusterSyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("listener bind failed: {0}")]
    Bind(#[source] std::io::Error),

    #[error("builder precondition not met: {reason}")]
    BuilderIncomplete { reason: String },
}

pub type Result<T> = core::result::Result<T, ClusterSyncError>;
