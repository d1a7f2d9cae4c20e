//! The on-wire `SyncEnvelope` and its discrete fields (spec §3, §6).

use crate::content::SyncContent;
use crate::dispatch::DispatchPolicy;
use crate::ids::{IdSet, NodeId};

/// Upper bound on the back-and-forth depth of a single logical exchange
/// (spec §4.4, §8 property 4).
pub const SEQ_MAX: u8 = 4;

/// Wire message type (spec §6: `uint8 messageType`, 0..9).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageType {
    Ok,
    Check,
    BadKey,
    BadSeq,
    BadId,
    NotValidEdge,
    BothStartup,
    FailedRing,
    /// Reserved codepoint: defined on the wire but never emitted by a
    /// conforming implementation (spec §9 open questions).
    FullCheck,
    /// Reserved codepoint: defined on the wire but never emitted by a
    /// conforming implementation (spec §9 open questions).
    StartupCheck,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => MessageType::Ok,
            1 => MessageType::Check,
            2 => MessageType::BadKey,
            3 => MessageType::BadSeq,
            4 => MessageType::BadId,
            5 => MessageType::NotValidEdge,
            6 => MessageType::BothStartup,
            7 => MessageType::FailedRing,
            8 => MessageType::FullCheck,
            9 => MessageType::StartupCheck,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        match self {
            MessageType::Ok => 0,
            MessageType::Check => 1,
            MessageType::BadKey => 2,
            MessageType::BadSeq => 3,
            MessageType::BadId => 4,
            MessageType::NotValidEdge => 5,
            MessageType::BothStartup => 6,
            MessageType::FailedRing => 7,
            MessageType::FullCheck => 8,
            MessageType::StartupCheck => 9,
        }
    }

    /// Reserved codepoints are rejected by a conforming receiver with
    /// `TYPE_BAD_SEQ`, per spec §9.
    pub fn is_reserved(self) -> bool {
        matches!(self, MessageType::FullCheck | MessageType::StartupCheck)
    }
}

/// `syncMode` (spec §6: `uint8`, 0=MESSAGE, 1=CLUSTER).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncMode {
    Message,
    Cluster,
}

impl SyncMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => SyncMode::Message,
            1 => SyncMode::Cluster,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        match self {
            SyncMode::Message => 0,
            SyncMode::Cluster => 1,
        }
    }
}

/// The top-level framed message on the wire (spec §3, §6).
#[derive(Clone, Debug)]
pub struct SyncEnvelope {
    pub sender_id: NodeId,
    pub message_type: MessageType,
    pub sequence: u8,
    pub in_startup: bool,
    pub sync_mode: SyncMode,
    pub sync_type: DispatchPolicy,
    pub key_chain: Option<Vec<String>>,
    pub expected_ids: Option<IdSet>,
    pub contents: Vec<SyncContent>,
}

impl SyncEnvelope {
    pub fn new(
        sender_id: NodeId,
        message_type: MessageType,
        sync_mode: SyncMode,
        sync_type: DispatchPolicy,
    ) -> Self {
        Self {
            sender_id,
            message_type,
            sequence: 0,
            in_startup: false,
            sync_mode,
            sync_type,
            key_chain: None,
            expected_ids: None,
            contents: Vec::new(),
        }
    }

    pub fn with_sequence(mut self, sequence: u8) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_in_startup(mut self, in_startup: bool) -> Self {
        self.in_startup = in_startup;
        self
    }

    pub fn with_contents(mut self, contents: Vec<SyncContent>) -> Self {
        self.contents = contents;
        self
    }

    pub fn with_expected_ids(mut self, ids: IdSet) -> Self {
        self.expected_ids = Some(ids);
        self
    }

    pub fn with_key_chain(mut self, key_chain: Vec<String>) -> Self {
        self.key_chain = Some(key_chain);
        self
    }
}
