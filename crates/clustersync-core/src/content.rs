//! `SyncContent`: one unit of exchange inside a `SyncEnvelope` (spec §3).

use crate::ids::IdSet;

/// One keyed unit within an envelope. Equality/hash is on `key` only: a
/// single key appears at most once per envelope.
#[derive(Clone, Debug)]
pub struct SyncContent {
    pub key: String,
    pub version: i64,
    pub aware_ids: IdSet,
    /// `None` with `version > 0`: "I already have this version; add me to
    /// the aware-set". `None` with `version == 0`: failure signal.
    pub payload: Option<Vec<u8>>,
}

impl SyncContent {
    pub fn new(key: impl Into<String>, version: i64, aware_ids: IdSet, payload: Option<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            version,
            aware_ids,
            payload,
        }
    }

    /// Builds the "already have it, ack only" content.
    pub fn ack(key: impl Into<String>, version: i64, aware_ids: IdSet) -> Self {
        assert!(version > 0, "ack content must carry a positive version");
        Self::new(key, version, aware_ids, None)
    }

    /// Builds the "failed" content (`version == 0`, no payload).
    pub fn failure(key: impl Into<String>, aware_ids: IdSet) -> Self {
        Self::new(key, 0, aware_ids, None)
    }

    pub fn is_failure(&self) -> bool {
        self.payload.is_none() && self.version == 0
    }

    pub fn is_ack(&self) -> bool {
        self.payload.is_none() && self.version > 0
    }
}

impl PartialEq for SyncContent {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for SyncContent {}

impl std::hash::Hash for SyncContent {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}
