//! `Session`: one peer connection over TCP, implementing
//! `clustersync_core::PeerSession`.
//!
//! Mirrors `spark-transport-tcp::channel::TcpChannel`'s `Arc<Inner>` shape,
//! simplified: no `CallContext` cancellation, no `BackpressureState`, no
//! pipeline/handshake binding (see DESIGN.md). Reads are owned by a
//! dedicated background task so `send` and `recv` never contend on the same
//! lock, unlike the teacher's single-mutex-for-both-directions channel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clustersync_core::{NodeId, PeerSession, Result, SyncEnvelope};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::TransportError;
use crate::framing::{read_envelope, write_envelope};

/// Inbound frames are buffered in a small channel between the reader task
/// and whoever calls `recv`; a session is request/response in practice, so
/// this rarely holds more than one frame.
const INBOX_CAPACITY: usize = 16;

struct Inner {
    peer_id: Option<NodeId>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    write_half: AsyncMutex<OwnedWriteHalf>,
    inbox: AsyncMutex<mpsc::Receiver<std::io::Result<SyncEnvelope>>>,
    reader: JoinHandle<()>,
    closed: AtomicBool,
}

/// A live TCP connection to exactly one peer.
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Wraps an already-established `TcpStream`, spawning the background
    /// reader task. `peer_id` is `None` until the first inbound envelope
    /// reveals the peer's identity (the accept path does not know it ahead
    /// of time; the connect path does).
    pub fn from_stream(stream: TcpStream, peer_id: Option<NodeId>) -> std::io::Result<Self> {
        stream.set_nodelay(true)?;
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let reader = tokio::spawn(reader_loop(read_half, tx, peer_addr));

        Ok(Self {
            inner: Arc::new(Inner {
                peer_id,
                local_addr,
                peer_addr,
                write_half: AsyncMutex::new(write_half),
                inbox: AsyncMutex::new(rx),
                reader,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Dials `addr`, retrying at a fixed `backoff_base` interval (spec §5's
    /// "connect/retry loop with fixed back-off") until it succeeds. There is
    /// no attempt cap: a peer that is down simply keeps getting retried
    /// every `backoff_base` until the caller gives up by dropping the
    /// future (e.g. the orchestrator's own timeout) or the cluster shuts
    /// down.
    pub async fn connect_with_backoff(
        peer_id: NodeId,
        addr: SocketAddr,
        connect_timeout: Duration,
        backoff_base: Duration,
    ) -> Result<Self> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(peer = peer_id, %addr, attempt, "dialing peer");
            let dial = tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await;
            match dial {
                Ok(Ok(stream)) => {
                    return Session::from_stream(stream, Some(peer_id)).map_err(|source| {
                        TransportError::Io {
                            peer: Some(peer_id),
                            source,
                        }
                        .into()
                    });
                }
                Ok(Err(source)) => {
                    warn!(peer = peer_id, %addr, attempt, error = %source, "connect failed, retrying");
                }
                Err(_) => {
                    warn!(peer = peer_id, %addr, attempt, "connect timed out, retrying");
                }
            }
            tokio::time::sleep(backoff_base).await;
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }
}

async fn reader_loop(
    mut read_half: OwnedReadHalf,
    tx: mpsc::Sender<std::io::Result<SyncEnvelope>>,
    peer_addr: SocketAddr,
) {
    loop {
        let frame = read_envelope(&mut read_half).await;
        let is_err = frame.is_err();
        if tx.send(frame).await.is_err() {
            break;
        }
        if is_err {
            break;
        }
    }
    trace!(%peer_addr, "reader task exiting");
}

#[async_trait]
impl PeerSession for Session {
    fn peer_id(&self) -> Option<NodeId> {
        self.inner.peer_id
    }

    async fn send(&self, envelope: SyncEnvelope) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed {
                peer: self.inner.peer_id,
            }
            .into());
        }
        let mut w = self.inner.write_half.lock().await;
        write_envelope(&mut *w, &envelope).await.map_err(|source| {
            TransportError::Io {
                peer: self.inner.peer_id,
                source,
            }
            .into()
        })
    }

    async fn recv(&self) -> Result<SyncEnvelope> {
        let mut rx = self.inner.inbox.lock().await;
        match rx.recv().await {
            Some(Ok(env)) => Ok(env),
            Some(Err(source)) => Err(TransportError::Io {
                peer: self.inner.peer_id,
                source,
            }
            .into()),
            None => Err(TransportError::Closed {
                peer: self.inner.peer_id,
            }
            .into()),
        }
    }

    async fn close(&self, planned: bool) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(peer = ?self.inner.peer_id, planned, "closing session");
        self.inner.reader.abort();
        let mut w = self.inner.write_half.lock().await;
        let _ = w.shutdown().await;
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clustersync_core::{DispatchPolicy, IdSet, MessageType, SyncContent, SyncEnvelope, SyncMode};

    async fn loopback_pair() -> (Session, Session) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let local_addr = listener.local_addr().expect("query listener addr");
        let (client, server) = tokio::join!(TcpStream::connect(local_addr), listener.accept());
        let client = Session::from_stream(client.expect("client connect"), Some(2))
            .expect("construct client session");
        let (server_stream, _) = server.expect("accept server");
        let server = Session::from_stream(server_stream, Some(1)).expect("construct server session");
        (client, server)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn send_recv_roundtrip() {
        let (client, server) = loopback_pair().await;

        let envelope = SyncEnvelope::new(2, MessageType::Check, SyncMode::Message, DispatchPolicy::UnicastPlain)
            .with_sequence(1)
            .with_contents(vec![SyncContent::new(
                "chan/k1",
                5,
                IdSet::from_iter([2]),
                Some(b"payload".to_vec()),
            )]);

        client.send(envelope).await.expect("send");
        let received = server.recv().await.expect("recv");
        assert_eq!(received.sender_id, 2);
        assert_eq!(received.sequence, 1);
        assert_eq!(received.contents.len(), 1);
        assert_eq!(received.contents[0].key, "chan/k1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn recv_after_peer_closes_returns_closed_error() {
        let (client, server) = loopback_pair().await;
        client.close(true).await;
        let result = server.recv().await;
        assert!(result.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn close_is_idempotent() {
        let (client, _server) = loopback_pair().await;
        client.close(true).await;
        client.close(true).await;
        assert!(client.is_closed());
    }
}
