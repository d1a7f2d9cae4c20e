//! Tokio-backed TCP transport for clustersync: implements the
//! `clustersync_core::{PeerSession, SessionProvider}` seam with a real
//! `tokio::net::TcpStream`-based session, a connection pool, and an accept
//! loop, the way `spark-transport-tcp` implements `spark-transport`'s
//! channel contract over the same runtime.

pub mod error;
pub mod framing;
pub mod listener;
pub mod pool;
pub mod session;

pub use error::TransportError;
pub use listener::Listener;
pub use pool::{DialSettings, SessionPool};
pub use session::Session;
