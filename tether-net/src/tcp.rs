//! TcpTransport - Transport over plain TCP
//!
//! One TCP connection carries exactly one stream. The dialing side opens a
//! fresh socket per `open_bi()` and announces its `PeerId` with a 16-byte
//! hello; peer addresses come from a static address book.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tether_model::{PeerId, PEER_ID_LEN};
use tether_net_types::{BiStream, Connection, Transport, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

const HELLO_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
const ACCEPT_BACKLOG: usize = 64;

/// TCP transport with a static peer address book.
///
/// A background task owns the listener and greets each socket in its own
/// task, so a client that never says hello delays nobody else.
#[derive(Clone, Debug)]
pub struct TcpTransport {
    peer: PeerId,
    addr: SocketAddr,
    incoming: Arc<Mutex<mpsc::Receiver<TcpConnection>>>,
    book: Arc<RwLock<HashMap<PeerId, SocketAddr>>>,
}

impl TcpTransport {
    /// Bind a listener for `peer` on `addr` and start accepting.
    ///
    /// Must be called within a Tokio runtime. Accepting stops once every
    /// clone of the transport is dropped.
    pub async fn bind(peer: PeerId, addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Accept(format!("bind {}: {}", addr, e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| TransportError::Accept(e.to_string()))?;
        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        tokio::spawn(accept_loop(listener, tx));
        Ok(Self {
            peer,
            addr,
            incoming: Arc::new(Mutex::new(rx)),
            book: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.addr)
    }

    /// Record where `peer` listens.
    pub fn add_peer(&self, peer: PeerId, addr: SocketAddr) {
        if let Ok(mut book) = self.book.write() {
            book.insert(peer, addr);
        }
    }

    fn lookup(&self, peer: &PeerId) -> Option<SocketAddr> {
        self.book.read().ok()?.get(peer).copied()
    }
}

async fn accept_loop(listener: TcpListener, queue: mpsc::Sender<TcpConnection>) {
    loop {
        let accepted = tokio::select! {
            _ = queue.closed() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        tokio::spawn(greet(stream, addr, queue.clone()));
    }
    tracing::debug!("TCP listener closed");
}

async fn greet(mut stream: TcpStream, addr: SocketAddr, queue: mpsc::Sender<TcpConnection>) {
    match read_hello(&mut stream).await {
        Ok(remote) => {
            let _ = stream.set_nodelay(true);
            let conn = TcpConnection {
                remote,
                role: TcpRole::Accepted(Arc::new(Mutex::new(Some(stream)))),
            };
            // Only fails when the transport is gone.
            let _ = queue.send(conn).await;
        }
        Err(e) => {
            tracing::debug!(%addr, error = %e, "Dropping TCP connection without hello");
        }
    }
}

async fn read_hello(stream: &mut TcpStream) -> Result<PeerId, TransportError> {
    let mut hello = [0u8; PEER_ID_LEN];
    tokio::time::timeout(HELLO_TIMEOUT, stream.read_exact(&mut hello))
        .await
        .map_err(|_| TransportError::Accept("hello timed out".into()))?
        .map_err(|e| TransportError::Accept(format!("hello: {}", e)))?;
    Ok(PeerId::from(hello))
}

impl Transport for TcpTransport {
    type Connection = TcpConnection;

    fn local_peer(&self) -> PeerId {
        self.peer
    }

    fn connect(&self, peer: &PeerId) -> impl std::future::Future<Output = Result<Self::Connection, TransportError>> + Send {
        let remote = *peer;
        let addr = self.lookup(peer);
        let local = self.peer;
        async move {
            let addr = addr.ok_or_else(|| {
                TransportError::Connect(format!("No address known for peer {}", remote.fmt_short()))
            })?;
            Ok(TcpConnection {
                remote,
                role: TcpRole::Dial { addr, local },
            })
        }
    }

    fn accept(&self) -> impl std::future::Future<Output = Option<Self::Connection>> + Send {
        let incoming = self.incoming.clone();
        async move { incoming.lock().await.recv().await }
    }
}

enum TcpRole {
    /// Dials `addr` for every stream.
    Dial { addr: SocketAddr, local: PeerId },
    /// The single stream of an accepted socket, handed out once.
    Accepted(Arc<Mutex<Option<TcpStream>>>),
}

/// A TCP "connection": a dial target, or one accepted socket.
pub struct TcpConnection {
    remote: PeerId,
    role: TcpRole,
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("remote", &self.remote)
            .finish()
    }
}

impl Connection for TcpConnection {
    type Stream = TcpBiStream;

    fn open_bi(&self) -> impl std::future::Future<Output = Result<Self::Stream, TransportError>> + Send {
        let role = match &self.role {
            TcpRole::Dial { addr, local } => TcpRole::Dial { addr: *addr, local: *local },
            TcpRole::Accepted(slot) => TcpRole::Accepted(slot.clone()),
        };
        async move {
            match role {
                TcpRole::Dial { addr, local } => {
                    let mut stream = TcpStream::connect(addr)
                        .await
                        .map_err(|e| TransportError::Connect(format!("{}: {}", addr, e)))?;
                    let _ = stream.set_nodelay(true);
                    stream
                        .write_all(local.as_bytes())
                        .await
                        .map_err(|e| TransportError::Stream(e.to_string()))?;
                    Ok(TcpBiStream(stream))
                }
                TcpRole::Accepted(slot) => slot
                    .lock()
                    .await
                    .take()
                    .map(TcpBiStream)
                    .ok_or_else(|| TransportError::Stream("Connection closed".into())),
            }
        }
    }

    fn remote_peer(&self) -> PeerId {
        self.remote
    }
}

/// One TCP socket as a bidirectional stream.
pub struct TcpBiStream(TcpStream);

impl BiStream for TcpBiStream {
    type SendStream = OwnedWriteHalf;
    type RecvStream = OwnedReadHalf;

    fn into_split(self) -> (Self::SendStream, Self::RecvStream) {
        let (read, write) = self.0.into_split();
        (write, read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RpcClient, RpcHandler, RpcServer};
    use crate::proto::Failure;
    use tokio_util::sync::CancellationToken;

    struct Upper;

    #[async_trait::async_trait]
    impl RpcHandler for Upper {
        async fn handle(&self, _remote: PeerId, _method: &str, payload: Vec<u8>) -> Result<Vec<u8>, Failure> {
            Ok(payload.to_ascii_uppercase())
        }
    }

    #[tokio::test]
    async fn test_rpc_over_tcp() {
        let loopback: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let a = TcpTransport::bind(PeerId([1; PEER_ID_LEN]), loopback).await.unwrap();
        let b = TcpTransport::bind(PeerId([2; PEER_ID_LEN]), loopback).await.unwrap();
        a.add_peer(b.local_peer(), b.local_addr().unwrap());

        let cancel = CancellationToken::new();
        let server = RpcServer::new(Duration::from_secs(5));
        server.register("upper", Arc::new(Upper));
        let _accept = server.spawn(b.clone(), cancel.clone());

        let client = RpcClient::new(a, Duration::from_secs(5));
        for word in ["tcp", "again"] {
            let reply = client
                .call(&b.local_peer(), "upper", "go", word.as_bytes().to_vec(), &cancel)
                .await
                .unwrap();
            assert_eq!(reply, word.to_uppercase().into_bytes());
        }
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_silent_socket_does_not_block_others() {
        let loopback: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let a = TcpTransport::bind(PeerId([1; PEER_ID_LEN]), loopback).await.unwrap();
        let b = TcpTransport::bind(PeerId([2; PEER_ID_LEN]), loopback).await.unwrap();
        a.add_peer(b.local_peer(), b.local_addr().unwrap());

        let cancel = CancellationToken::new();
        let server = RpcServer::new(Duration::from_secs(5));
        server.register("upper", Arc::new(Upper));
        let _accept = server.spawn(b.clone(), cancel.clone());

        // Connected but never sends its hello.
        let _silent = TcpStream::connect(b.local_addr().unwrap()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = RpcClient::new(a, Duration::from_secs(2));
        let reply = client
            .call(&b.local_peer(), "upper", "go", b"quick".to_vec(), &cancel)
            .await
            .unwrap();
        assert_eq!(reply, b"QUICK".to_vec());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_connect_unknown_peer() {
        let loopback: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let a = TcpTransport::bind(PeerId([1; PEER_ID_LEN]), loopback).await.unwrap();
        let err = a.connect(&PeerId([9; PEER_ID_LEN])).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
    }
}
