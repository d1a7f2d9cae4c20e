//! Protocol-level state machine for cluster membership replication and
//! application publication dispatch. No I/O lives here: concrete transports
//! implement the [`transport::PeerSession`]/[`transport::SessionProvider`]
//! seams this crate depends on.

pub mod awareness;
pub mod config;
pub mod content;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod member;
pub mod membership_handler;
pub mod protocol;
pub mod orchestrator;
pub mod publication;
pub mod registry;
pub mod ring;
pub mod transport;
pub mod wire;

pub use awareness::AwarenessStore;
pub use config::{ClusterConfig, ConfigError, PeerConfig};
pub use content::SyncContent;
pub use dispatch::{DispatchPolicy, SuccessRule, TargetSelector, Topology};
pub use envelope::{MessageType, SyncEnvelope, SyncMode, SEQ_MAX};
pub use error::{Result, SyncError};
pub use ids::{IdSet, NodeId, UNKNOWN_NODE_ID};
pub use member::{Member, MemberState, MemberStore, MemberSnapshot, SharedMemberStore, SyncAddress};
pub use membership_handler::MembershipSyncHandler;
pub use orchestrator::{SyncOrchestrator, SyncResult};
pub use protocol::{ProtocolContext, ProtocolEngine, SessionProtocolState, UserSyncCallback};
pub use publication::{MembershipCommand, MembershipPublication, Publication, UserPublication};
pub use registry::{PublicationFactory, PublicationRegistry};
pub use ring::{NoopRingFallback, RingFallbackTransport};
pub use transport::{PeerSession, SessionProvider};
