//! RpcClient - send one request to a peer and await its reply

use crate::error::RpcError;
use crate::framing::{MessageSink, MessageStream};
use crate::proto::{rpc_response, RpcRequest, RpcResponse};
use prost::Message;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_model::PeerId;
use tether_net_types::{BiStream, Connection, Transport};
use tokio_util::sync::CancellationToken;

/// Outbound half of the RPC layer.
///
/// Each call opens its own stream, so calls to the same or different peers
/// never block each other.
#[derive(Clone, Debug)]
pub struct RpcClient<T: Transport> {
    transport: T,
    timeout: Duration,
    next_id: Arc<AtomicU64>,
}

impl<T: Transport> RpcClient<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.transport.local_peer()
    }

    /// Call `service.method` on `peer` with an already-encoded payload.
    ///
    /// Returns `Cancelled` if `cancel` fires first and `Timeout` if the reply
    /// takes longer than the configured timeout.
    pub async fn call(
        &self,
        peer: &PeerId,
        service: &str,
        method: &str,
        payload: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, RpcError> {
        let request = RpcRequest {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            service: service.to_string(),
            method: method.to_string(),
            payload,
        };

        tracing::trace!(peer = %peer.fmt_short(), service, method, id = request.id, "rpc call");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RpcError::Cancelled),
            res = tokio::time::timeout(self.timeout, self.exchange(*peer, request)) => {
                res.unwrap_or(Err(RpcError::Timeout(self.timeout)))
            }
        }
    }

    /// Typed wrapper around [`RpcClient::call`].
    pub async fn call_message<Req, Resp>(
        &self,
        peer: &PeerId,
        service: &str,
        method: &str,
        request: &Req,
        cancel: &CancellationToken,
    ) -> Result<Resp, RpcError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let bytes = self.call(peer, service, method, request.encode_to_vec(), cancel).await?;
        Ok(Resp::decode(bytes.as_slice())?)
    }

    async fn exchange(&self, peer: PeerId, request: RpcRequest) -> Result<Vec<u8>, RpcError> {
        let conn = self.transport.connect(&peer).await?;
        let (send, recv) = conn.open_bi().await?.into_split();
        let mut sink = MessageSink::new(send);
        let mut stream = MessageStream::new(recv);

        sink.send(&request).await?;
        let response: RpcResponse = stream.recv().await?.ok_or(RpcError::Closed)?;
        // Reply is in hand; a failed close only affects the server's read loop.
        let _ = sink.finish().await;

        if response.id != request.id {
            return Err(RpcError::Mismatch {
                expected: request.id,
                got: response.id,
            });
        }

        match response.outcome {
            Some(rpc_response::Outcome::Payload(payload)) => Ok(payload),
            Some(rpc_response::Outcome::Failure(failure)) => Err(RpcError::Failure(failure)),
            None => Err(RpcError::EmptyReply),
        }
    }
}
