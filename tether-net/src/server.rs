//! RpcServer - accept streams and route each request to a service handler.
//!
//! Handlers register under a service name; the accept loop, per-connection
//! stream loop and per-stream dispatch loop are generic over the transport.

use crate::error::RpcError;
use crate::framing::{MessageSink, MessageStream};
use crate::proto::{failure_code, Failure, RpcRequest, RpcResponse};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tether_model::PeerId;
use tether_net_types::{BiStream, Connection, Transport};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A service reachable through the RPC server.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// Handle one request. `Err` is sent back to the caller as an application failure.
    async fn handle(&self, remote: PeerId, method: &str, payload: Vec<u8>) -> Result<Vec<u8>, Failure>;
}

/// Inbound half of the RPC layer.
pub struct RpcServer {
    handlers: RwLock<HashMap<String, Arc<dyn RpcHandler>>>,
    stream_timeout: Duration,
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("stream_timeout", &self.stream_timeout)
            .finish_non_exhaustive()
    }
}

impl RpcServer {
    /// `stream_timeout` bounds how long an idle stream is kept open waiting for the next request.
    pub fn new(stream_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            handlers: RwLock::new(HashMap::new()),
            stream_timeout,
        })
    }

    /// Route requests for `service` to `handler`, replacing any previous handler.
    pub fn register(&self, service: impl Into<String>, handler: Arc<dyn RpcHandler>) {
        let service = service.into();
        tracing::debug!(service = %service, "Registering RPC service");
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.insert(service, handler);
        }
    }

    pub fn unregister(&self, service: &str) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.remove(service);
        }
    }

    fn handler(&self, service: &str) -> Option<Arc<dyn RpcHandler>> {
        self.handlers.read().ok()?.get(service).cloned()
    }

    /// Run one request through its service handler and build the reply.
    pub async fn dispatch(&self, remote: PeerId, request: RpcRequest) -> RpcResponse {
        let Some(handler) = self.handler(&request.service) else {
            tracing::debug!(service = %request.service, "Unknown service");
            return RpcResponse::failure(
                request.id,
                Failure::new(
                    failure_code::UNKNOWN_SERVICE,
                    format!("service {:?} is not registered", request.service),
                ),
            );
        };

        match handler.handle(remote, &request.method, request.payload).await {
            Ok(payload) => RpcResponse::payload(request.id, payload),
            Err(failure) => {
                tracing::debug!(
                    service = %request.service,
                    method = %request.method,
                    code = %failure.code,
                    "Handler failure"
                );
                RpcResponse::failure(request.id, failure)
            }
        }
    }

    /// Spawn the accept loop for `transport`. Stops when `cancel` fires or the transport shuts down.
    pub fn spawn<T: Transport>(self: &Arc<Self>, transport: T, cancel: CancellationToken) -> JoinHandle<()> {
        let server = self.clone();
        tokio::spawn(async move {
            loop {
                let conn = tokio::select! {
                    _ = cancel.cancelled() => break,
                    conn = transport.accept() => conn,
                };
                let Some(conn) = conn else { break };
                tokio::spawn(server.clone().handle_connection(conn, cancel.clone()));
            }
            tracing::debug!(peer = %transport.local_peer().fmt_short(), "RPC accept loop stopped");
        })
    }

    /// Keep taking streams from one connection until it closes.
    async fn handle_connection<C: Connection>(self: Arc<Self>, conn: C, cancel: CancellationToken) {
        let remote = conn.remote_peer();
        loop {
            let stream = tokio::select! {
                _ = cancel.cancelled() => break,
                stream = conn.open_bi() => stream,
            };
            match stream {
                Ok(stream) => {
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_stream(remote, stream).await {
                            tracing::debug!(error = %e, "Stream handler error");
                        }
                    });
                }
                Err(e) => {
                    tracing::trace!(remote = %remote.fmt_short(), "Connection closed: {}", e);
                    break;
                }
            }
        }
    }

    /// Dispatch loop - handles multiple requests per stream
    async fn handle_stream<S: BiStream>(&self, remote: PeerId, stream: S) -> Result<(), RpcError> {
        let (send, recv) = stream.into_split();
        let mut sink = MessageSink::new(send);
        let mut stream = MessageStream::new(recv);

        loop {
            let request: RpcRequest = match tokio::time::timeout(self.stream_timeout, stream.recv()).await {
                Ok(Ok(Some(r))) => r,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    tracing::debug!("Stream recv error: {}", e);
                    break;
                }
                Err(_) => {
                    tracing::debug!("Stream timed out");
                    break;
                }
            };

            let response = self.dispatch(remote, request).await;
            sink.send(&response).await?;
        }
        sink.finish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::rpc_response::Outcome;

    struct Echo;

    #[async_trait]
    impl RpcHandler for Echo {
        async fn handle(&self, _remote: PeerId, method: &str, payload: Vec<u8>) -> Result<Vec<u8>, Failure> {
            match method {
                "echo" => Ok(payload),
                other => Err(Failure::new(failure_code::UNKNOWN_METHOD, other)),
            }
        }
    }

    fn request(service: &str, method: &str) -> RpcRequest {
        RpcRequest {
            id: 9,
            service: service.into(),
            method: method.into(),
            payload: b"hi".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_service() {
        let server = RpcServer::new(Duration::from_secs(1));
        server.register("echo", Arc::new(Echo));

        let resp = server.dispatch(PeerId::default(), request("echo", "echo")).await;
        assert_eq!(resp.id, 9);
        assert_eq!(resp.outcome, Some(Outcome::Payload(b"hi".to_vec())));

        let resp = server.dispatch(PeerId::default(), request("echo", "shout")).await;
        match resp.outcome {
            Some(Outcome::Failure(f)) => assert_eq!(f.code, failure_code::UNKNOWN_METHOD),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unregistered_service_fails() {
        let server = RpcServer::new(Duration::from_secs(1));
        server.register("echo", Arc::new(Echo));
        server.unregister("echo");

        let resp = server.dispatch(PeerId::default(), request("echo", "echo")).await;
        match resp.outcome {
            Some(Outcome::Failure(f)) => assert_eq!(f.code, failure_code::UNKNOWN_SERVICE),
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
