//! Publications: the payloads carried by a `SyncContent` (spec §3).

use crate::error::{Result, SyncError};
use crate::ids::NodeId;
use crate::member::SyncAddress;

/// Capability set any publication type must implement: serialize,
/// deserialize, and expose the `(channel, key, version)` triple it's
/// addressed by.
pub trait Publication: Send + Sync + 'static {
    fn channel(&self) -> &str;
    fn key(&self) -> &str;
    fn version(&self) -> i64;
    fn serialize(&self) -> Vec<u8>;
    fn deserialize(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

/// Membership gossip command, carried by a [`MembershipPublication`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MembershipCommand {
    TakeThis,
    GiveThis,
    DelThis,
    Ok,
    RcptThis,
}

impl MembershipCommand {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(MembershipCommand::TakeThis),
            1 => Ok(MembershipCommand::GiveThis),
            2 => Ok(MembershipCommand::DelThis),
            3 => Ok(MembershipCommand::Ok),
            4 => Ok(MembershipCommand::RcptThis),
            other => Err(SyncError::Malformed {
                reason: format!("unknown membership command byte {other}"),
            }),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            MembershipCommand::TakeThis => 0,
            MembershipCommand::GiveThis => 1,
            MembershipCommand::DelThis => 2,
            MembershipCommand::Ok => 3,
            MembershipCommand::RcptThis => 4,
        }
    }
}

/// The core-defined publication carrying a membership record (spec §3, §6).
#[derive(Clone, Debug)]
pub struct MembershipPublication {
    pub id: NodeId,
    pub auth_by_key: bool,
    /// The node's authentication key (or the head of its key chain). Not to
    /// be confused with [`Publication::key`], which is the *addressing* key
    /// used to slot this publication into a `SyncContent`.
    pub key: String,
    pub version: i64,
    pub sync_addresses: Vec<SyncAddress>,
    pub command: MembershipCommand,
    /// Cached addressing key (`"member/<id>"`), computed once at
    /// construction so `Publication::key` can hand back a borrow.
    addressing_key: String,
}

impl MembershipPublication {
    pub const CHANNEL: &'static str = "__cluster__";

    pub fn new(
        id: NodeId,
        auth_by_key: bool,
        key: impl Into<String>,
        version: i64,
        sync_addresses: Vec<SyncAddress>,
        command: MembershipCommand,
    ) -> Self {
        Self {
            id,
            auth_by_key,
            key: key.into(),
            version,
            sync_addresses,
            command,
            addressing_key: Self::key_for(id),
        }
    }

    pub fn key_for(id: NodeId) -> String {
        format!("member/{id}")
    }
}

impl Publication for MembershipPublication {
    fn channel(&self) -> &str {
        Self::CHANNEL
    }

    fn key(&self) -> &str {
        &self.addressing_key
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn serialize(&self) -> Vec<u8> {
        crate::wire::encode_membership_publication(self)
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        crate::wire::decode_membership_publication(bytes)
    }
}

/// Opaque, user-defined payload addressable by `(channel, key, version)`.
#[derive(Clone, Debug)]
pub struct UserPublication {
    pub channel: String,
    pub key: String,
    pub version: i64,
    pub bytes: Vec<u8>,
}

impl Publication for UserPublication {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn serialize(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    fn deserialize(_bytes: &[u8]) -> Result<Self> {
        // `UserPublication` is opaque to the core: the envelope already
        // carries `(key, version)` out of band (in `SyncContent`), so a
        // bare `deserialize(bytes)` can't recover them. Real callers use
        // `UserPublication { channel, key, version, bytes: bytes.to_vec() }`
        // built from the enclosing `SyncContent` instead of this path; it
        // exists only to satisfy the `Publication` trait bound.
        Err(SyncError::InvalidInput {
            reason: "UserPublication cannot be reconstructed from bytes alone".into(),
        })
    }
}
