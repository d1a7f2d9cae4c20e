//! TCP accept loop: for each inbound connection, drives `ProtocolEngine`
//! over the resulting `Session` until the session closes.
//!
//! Grounded on `spark-transport-tcp::listener::TcpListener`'s thin wrapper
//! around `tokio::net::TcpListener`, with the per-connection "drive the
//! state machine" loop the teacher leaves to its callers written out here
//! since `clustersync-transport-tcp` owns both ends of that contract.

use std::net::SocketAddr;
use std::sync::Arc;

use clustersync_core::{PeerSession, ProtocolContext, ProtocolEngine, SessionProtocolState};
use tokio::net::TcpListener as TokioTcpListener;
use tracing::{debug, info, warn};

use crate::pool::SessionPool;
use crate::session::Session;

pub struct Listener {
    inner: TokioTcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let inner = TokioTcpListener::bind(addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections forever, spawning one task per connection that
    /// drives `ProtocolEngine::handle` until the peer closes or a protocol
    /// violation forces a close. Never returns on its own; callers run it
    /// as a background task and drop it (or abort the `JoinHandle`) to stop
    /// accepting.
    pub async fn serve(self, ctx: ProtocolContext, pool: Arc<SessionPool>) -> std::io::Result<()> {
        loop {
            let (stream, peer_addr) = self.inner.accept().await?;
            debug!(%peer_addr, "accepted connection");
            let ctx = ctx.clone();
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, peer_addr, ctx, pool).await {
                    warn!(%peer_addr, error = %e, "connection ended with error");
                }
            });
        }
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    ctx: ProtocolContext,
    pool: Arc<SessionPool>,
) -> std::io::Result<()> {
    let session = Arc::new(Session::from_stream(stream, None)?);
    let mut session_state = SessionProtocolState {
        initiated: false,
        startup_state_at_open: ctx.is_in_startup(),
    };
    let mut adopted = false;

    loop {
        let envelope = match session.recv().await {
            Ok(env) => env,
            Err(e) => {
                debug!(%peer_addr, error = %e, "session recv failed, closing");
                session.close(false).await;
                return Ok(());
            }
        };

        if !adopted {
            pool.adopt(envelope.sender_id, Arc::clone(&session));
            adopted = true;
        }

        let outcome = ProtocolEngine::handle(&ctx, &mut session_state, &envelope).await;

        if let Some(reply) = outcome.reply {
            if let Err(e) = session.send(reply).await {
                warn!(%peer_addr, error = %e, "failed to send reply");
                session.close(false).await;
                return Ok(());
            }
        }

        if outcome.close_session {
            session.close(outcome.planned_close).await;
            info!(%peer_addr, planned = outcome.planned_close, "session closed");
            return Ok(());
        }
    }
}
