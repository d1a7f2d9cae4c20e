//! Error kinds surfaced by the synchronisation engine (spec §7).
//!
//! Each variant corresponds to a row of the error table in the specification:
//! it names the trigger and carries enough context to log or report it, but
//! never carries a recovery action of its own — callers classify with
//! [`SyncError::retryable`] and act accordingly.

use thiserror::Error;

use crate::ids::NodeId;

/// The core error domain for the synchronisation engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Peer presented a key found in the local keyChain (spec §4.5 step 4).
    #[error("peer {peer} presented a superseded key")]
    BadKey { peer: NodeId },

    /// `sequence > SEQ_MAX` or negative.
    #[error("sequence {sequence} exceeds SEQ_MAX ({max})", max = crate::envelope::SEQ_MAX)]
    BadSequence { sequence: u8 },

    /// Reserved id range or cross-cluster id collision detected.
    #[error("bad node id: {reason}")]
    BadId { reason: &'static str },

    /// Peer unknown or marked invalid locally.
    #[error("peer {peer} is not a valid edge")]
    NotValidEdge { peer: NodeId },

    /// Both ends were `inStartup` simultaneously.
    #[error("both peers are in startup; deferring to fallback transport")]
    BothStartup,

    /// Nested ring orchestration returned no result.
    #[error("ring forwarding for key `{key}` failed")]
    FailedRing { key: String },

    /// Connect refused, timeout, or I/O error at the transport boundary.
    #[error("transport error while talking to peer {peer:?}: {message}")]
    Transport {
        peer: Option<NodeId>,
        message: String,
    },

    /// The wire codec could not decode a frame.
    #[error("malformed frame: {reason}")]
    Malformed { reason: String },

    /// A caller-side precondition was violated (empty publication list, no
    /// callback registered, unregistered publication type, ...).
    #[error("invalid orchestrator input: {reason}")]
    InvalidInput { reason: String },
}

impl SyncError {
    /// Classifies an error as retryable or terminal for the owning session,
    /// per spec §7's classification table.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            SyncError::BothStartup | SyncError::Transport { .. } | SyncError::BadSequence { .. }
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, SyncError>;
