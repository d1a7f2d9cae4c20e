//! Transport-local error kind, folded into `clustersync_core::SyncError` at
//! the `PeerSession`/`SessionProvider` boundary so the protocol engine never
//! sees a transport-specific type.

use std::io;

use clustersync_core::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {peer:?} at {addr} failed: {source}")]
    Connect {
        peer: Option<NodeId>,
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connect to {peer:?} timed out after {timeout_ms}ms")]
    ConnectTimeout { peer: Option<NodeId>, timeout_ms: u64 },

    #[error("io error on session with {peer:?}: {source}")]
    Io {
        peer: Option<NodeId>,
        #[source]
        source: io::Error,
    },

    #[error("session with {peer:?} is closed")]
    Closed { peer: Option<NodeId> },

    #[error("frame exceeds maximum size ({len} > {max})")]
    FrameTooLarge { len: u32, max: u32 },

    #[error("no known address for peer {peer}")]
    NoAddress { peer: NodeId },
}

impl From<TransportError> for clustersync_core::SyncError {
    fn from(e: TransportError) -> Self {
        let peer = match &e {
            TransportError::Connect { peer, .. }
            | TransportError::ConnectTimeout { peer, .. }
            | TransportError::Io { peer, .. }
            | TransportError::Closed { peer } => *peer,
            TransportError::NoAddress { peer } => Some(*peer),
            TransportError::FrameTooLarge { .. } => None,
        };
        clustersync_core::SyncError::Transport {
            peer,
            message: e.to_string(),
        }
    }
}
