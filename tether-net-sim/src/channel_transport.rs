//! ChannelTransport - peers connected by in-process pipes
//!
//! A [`ChannelNetwork`] maps peer ids to accept queues. Dialing a peer hands
//! it a connection whose streams are `tokio::io::duplex` pipes.

use std::collections::HashMap;
use std::sync::Arc;
use tether_model::PeerId;
use tether_net_types::{BiStream, Connection, Transport, TransportError};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};

const PIPE_CAPACITY: usize = 64 * 1024;
const ACCEPT_BACKLOG: usize = 64;
const STREAM_BACKLOG: usize = 8;

type AcceptQueue = mpsc::Sender<ChannelConnection>;

/// Registry every `ChannelTransport` of one simulated network shares.
#[derive(Clone, Debug, Default)]
pub struct ChannelNetwork {
    listeners: Arc<Mutex<HashMap<PeerId, AcceptQueue>>>,
}

impl ChannelNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    async fn listener(&self, peer: &PeerId) -> Option<AcceptQueue> {
        self.listeners.lock().await.get(peer).cloned()
    }

    /// Take a peer off the network. New connections to it fail; streams
    /// already open keep working until either side drops them.
    pub async fn remove(&self, peer: &PeerId) {
        if self.listeners.lock().await.remove(peer).is_some() {
            tracing::debug!(peer = %peer.fmt_short(), "Removed from channel network");
        }
    }
}

/// One peer's endpoint on a [`ChannelNetwork`].
#[derive(Clone, Debug)]
pub struct ChannelTransport {
    peer: PeerId,
    network: ChannelNetwork,
    incoming: Arc<Mutex<mpsc::Receiver<ChannelConnection>>>,
}

impl ChannelTransport {
    /// Join `network` as `peer`, replacing any endpoint registered under the same id.
    pub async fn new(peer: PeerId, network: &ChannelNetwork) -> Self {
        let (queue, incoming) = mpsc::channel(ACCEPT_BACKLOG);
        network.listeners.lock().await.insert(peer, queue);
        Self {
            peer,
            network: network.clone(),
            incoming: Arc::new(Mutex::new(incoming)),
        }
    }
}

impl Transport for ChannelTransport {
    type Connection = ChannelConnection;

    fn local_peer(&self) -> PeerId {
        self.peer
    }

    fn connect(&self, peer: &PeerId) -> impl std::future::Future<Output = Result<Self::Connection, TransportError>> + Send {
        let network = self.network.clone();
        let local = self.peer;
        let remote = *peer;

        async move {
            let queue = network
                .listener(&remote)
                .await
                .ok_or_else(|| TransportError::Connect(format!("{} is not on the network", remote.fmt_short())))?;

            let (pipes_tx, pipes_rx) = mpsc::channel(STREAM_BACKLOG);
            let accepted = ChannelConnection {
                remote: local,
                pipes: Pipes::Inbound(Arc::new(Mutex::new(pipes_rx))),
            };
            queue
                .send(accepted)
                .await
                .map_err(|_| TransportError::Connect(format!("{} stopped accepting", remote.fmt_short())))?;

            Ok(ChannelConnection {
                remote,
                pipes: Pipes::Outbound(pipes_tx),
            })
        }
    }

    fn accept(&self) -> impl std::future::Future<Output = Option<Self::Connection>> + Send {
        let incoming = self.incoming.clone();
        async move { incoming.lock().await.recv().await }
    }
}

/// Where a connection's streams come from.
#[derive(Clone)]
enum Pipes {
    /// Dialing side: creates each pipe and ships the far end over.
    Outbound(mpsc::Sender<DuplexStream>),
    /// Accepting side: takes pipes in the order the dialer opened them.
    Inbound(Arc<Mutex<mpsc::Receiver<DuplexStream>>>),
}

/// Connection between two `ChannelTransport`s.
pub struct ChannelConnection {
    remote: PeerId,
    pipes: Pipes,
}

impl std::fmt::Debug for ChannelConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let side = match self.pipes {
            Pipes::Outbound(_) => "outbound",
            Pipes::Inbound(_) => "inbound",
        };
        f.debug_struct("ChannelConnection")
            .field("remote", &self.remote)
            .field("side", &side)
            .finish()
    }
}

impl Connection for ChannelConnection {
    type Stream = ChannelBiStream;

    fn open_bi(&self) -> impl std::future::Future<Output = Result<Self::Stream, TransportError>> + Send {
        let pipes = self.pipes.clone();
        async move {
            let pipe = match pipes {
                Pipes::Outbound(tx) => {
                    let (near, far) = tokio::io::duplex(PIPE_CAPACITY);
                    tx.send(far).await.map_err(|_| TransportError::Stream("peer hung up".into()))?;
                    near
                }
                Pipes::Inbound(rx) => rx
                    .lock()
                    .await
                    .recv()
                    .await
                    .ok_or_else(|| TransportError::Stream("peer hung up".into()))?,
            };
            Ok(ChannelBiStream(pipe))
        }
    }

    fn remote_peer(&self) -> PeerId {
        self.remote
    }
}

/// One duplex pipe; bytes written on one end are read on the other.
pub struct ChannelBiStream(DuplexStream);

impl BiStream for ChannelBiStream {
    type SendStream = WriteHalf<DuplexStream>;
    type RecvStream = ReadHalf<DuplexStream>;

    fn into_split(self) -> (Self::SendStream, Self::RecvStream) {
        let (read, write) = tokio::io::split(self.0);
        (write, read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_streams_carry_bytes_both_ways() {
        let net = ChannelNetwork::new();
        let a = ChannelTransport::new(PeerId([1; 16]), &net).await;
        let b = ChannelTransport::new(PeerId([2; 16]), &net).await;

        let conn = a.connect(&b.local_peer()).await.expect("connect");
        let accepted = b.accept().await.expect("accept");
        assert_eq!(accepted.remote_peer(), a.local_peer());
        assert_eq!(conn.remote_peer(), b.local_peer());

        let (mut a_send, mut a_recv) = conn.open_bi().await.expect("open").into_split();
        let (mut b_send, mut b_recv) = accepted.open_bi().await.expect("accept bi").into_split();

        a_send.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        b_recv.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        b_send.write_all(b"pong").await.unwrap();
        a_recv.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_connect_to_removed_peer_fails() {
        let net = ChannelNetwork::new();
        let a = ChannelTransport::new(PeerId([1; 16]), &net).await;
        let b = ChannelTransport::new(PeerId([2; 16]), &net).await;

        net.remove(&b.local_peer()).await;
        let err = a.connect(&b.local_peer()).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
    }
}
