//! The byte-pipe seam under the RPC layer
//!
//! A `Transport` names this peer and produces `Connection`s; a connection
//! yields `BiStream`s that split into an `AsyncWrite` and an `AsyncRead` half.
//! `tether-net` ships a TCP implementation and `tether-net-sim` an in-memory one.

use std::fmt;
use std::future::Future;
use tether_model::PeerId;
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("cannot reach peer: {0}")]
    Connect(String),
    #[error("inbound connection rejected: {0}")]
    Accept(String),
    #[error("stream failed: {0}")]
    Stream(String),
}

pub trait BiStream: Send + 'static {
    type SendStream: AsyncWrite + Send + Unpin + 'static;
    type RecvStream: AsyncRead + Send + Unpin + 'static;

    /// Halves are used from different places and must not share a lock.
    fn into_split(self) -> (Self::SendStream, Self::RecvStream);
}

/// Link to one remote peer.
///
/// Dialed connections open a fresh stream per call. Accepted connections
/// hand out the streams the remote opened, then fail once it is gone.
pub trait Connection: Send + Sync + 'static {
    type Stream: BiStream;

    fn open_bi(&self) -> impl Future<Output = Result<Self::Stream, TransportError>> + Send;

    fn remote_peer(&self) -> PeerId;
}

pub trait Transport: Clone + Send + Sync + fmt::Debug + 'static {
    type Connection: Connection;

    fn local_peer(&self) -> PeerId;

    fn connect(&self, peer: &PeerId) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    /// Next inbound connection; `None` once the transport has shut down.
    fn accept(&self) -> impl Future<Output = Option<Self::Connection>> + Send;
}
