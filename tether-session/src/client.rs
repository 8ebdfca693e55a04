//! SessionClient - session commands over the RPC client

use crate::proto::{
    ClearRequest, ClearResponse, DestroyRequest, DestroyResponse, FetchRequest, FetchResponse, UpdateRequest,
    UpdateResponse, WireAttr, METHOD_CLEAR, METHOD_DESTROY, METHOD_FETCH, METHOD_UPDATE, SERVICE,
};
use crate::rpc::{FetchReply, SessionRpc, UpdateReply};
use async_trait::async_trait;
use tether_model::{Attr, Namespace, RevisionNumber, SessionError, SessionId, VAttr};
use tether_net::{failure_code, Failure, RpcClient, RpcError};
use tether_net_types::Transport;
use tokio_util::sync::CancellationToken;

/// Sends session commands to the peer that owns the target session.
#[derive(Clone, Debug)]
pub struct SessionClient<T: Transport> {
    rpc: RpcClient<T>,
}

impl<T: Transport> SessionClient<T> {
    pub fn new(rpc: RpcClient<T>) -> Self {
        Self { rpc }
    }

    async fn call<Req, Resp>(
        &self,
        id: SessionId,
        method: &str,
        request: &Req,
        revision: RevisionNumber,
        cancel: &CancellationToken,
    ) -> Result<Resp, SessionError>
    where
        Req: prost::Message,
        Resp: prost::Message + Default,
    {
        self.rpc
            .call_message(&id.peer, SERVICE, method, request, cancel)
            .await
            .map_err(|e| session_error(id, revision, e))
    }
}

/// Rebuild the typed error the owning peer reported.
fn session_error(id: SessionId, requested: RevisionNumber, err: RpcError) -> SessionError {
    match err {
        RpcError::Failure(failure) => from_failure(id, requested, failure),
        RpcError::Cancelled => SessionError::Cancelled,
        RpcError::Timeout(_) => SessionError::Timeout,
        e @ (RpcError::Transport(_) | RpcError::Io(_) | RpcError::Closed) => SessionError::Transport(e.to_string()),
        e @ (RpcError::Decode(_) | RpcError::Mismatch { .. } | RpcError::EmptyReply) => {
            SessionError::Protocol(e.to_string())
        }
    }
}

fn from_failure(id: SessionId, requested: RevisionNumber, failure: Failure) -> SessionError {
    match failure.code.as_str() {
        failure_code::NOT_FOUND => SessionError::NotFound(id),
        failure_code::STALE_UPDATE => SessionError::StaleUpdate {
            id,
            requested,
            current: failure.revision,
        },
        failure_code::STALE_FETCH => SessionError::StaleFetch {
            id,
            revision: requested,
            keys: failure.keys,
        },
        failure_code::FROZEN_ATTRIBUTES => SessionError::FrozenAttributes { id, keys: failure.keys },
        failure_code::FUTURE_REVISION => SessionError::FutureRevision {
            id,
            requested,
            current: failure.revision,
        },
        failure_code::INVALID_NAMESPACE => SessionError::InvalidNamespace(failure.message),
        _ => SessionError::Protocol(failure.to_string()),
    }
}

#[async_trait]
impl<T: Transport> SessionRpc for SessionClient<T> {
    #[tracing::instrument(skip(self, id, keys, cancel), fields(session = %id))]
    async fn fetch(
        &self,
        id: SessionId,
        revision: RevisionNumber,
        namespace: &Namespace,
        keys: &[String],
        cancel: &CancellationToken,
    ) -> Result<FetchReply, SessionError> {
        let request = FetchRequest {
            target: Some(id.into()),
            revision,
            namespace: namespace.as_str().to_string(),
            keys: keys.to_vec(),
        };
        let response: FetchResponse = self.call(id, METHOD_FETCH, &request, revision, cancel).await?;
        let attrs = response
            .attrs
            .into_iter()
            .map(VAttr::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(SessionError::Protocol)?;
        tracing::debug!(revision = response.revision, found = attrs.len(), "Fetched");
        Ok(FetchReply {
            revision: response.revision,
            attrs,
        })
    }

    #[tracing::instrument(skip(self, id, attrs, cancel), fields(session = %id))]
    async fn update(
        &self,
        id: SessionId,
        revision: RevisionNumber,
        namespace: &Namespace,
        attrs: &[Attr],
        cancel: &CancellationToken,
    ) -> Result<UpdateReply, SessionError> {
        let request = UpdateRequest {
            target: Some(id.into()),
            revision,
            namespace: namespace.as_str().to_string(),
            attrs: attrs.iter().map(WireAttr::from).collect(),
        };
        let response: UpdateResponse = self.call(id, METHOD_UPDATE, &request, revision, cancel).await?;
        if response.created_at.len() != attrs.len() || response.updated_at.len() != attrs.len() {
            return Err(SessionError::Protocol(format!(
                "update reply carries {}/{} stamps for {} attributes",
                response.created_at.len(),
                response.updated_at.len(),
                attrs.len()
            )));
        }
        tracing::debug!(revision = response.revision, "Updated");
        Ok(UpdateReply {
            revision: response.revision,
            created_at: response.created_at,
            updated_at: response.updated_at,
        })
    }

    #[tracing::instrument(skip(self, id, cancel), fields(session = %id))]
    async fn clear(
        &self,
        id: SessionId,
        revision: RevisionNumber,
        namespace: &Namespace,
        cancel: &CancellationToken,
    ) -> Result<RevisionNumber, SessionError> {
        let request = ClearRequest {
            target: Some(id.into()),
            revision,
            namespace: namespace.as_str().to_string(),
        };
        let response: ClearResponse = self.call(id, METHOD_CLEAR, &request, revision, cancel).await?;
        Ok(response.revision)
    }

    #[tracing::instrument(skip(self, id, cancel), fields(session = %id))]
    async fn destroy(&self, id: SessionId, revision: RevisionNumber, cancel: &CancellationToken) -> Result<(), SessionError> {
        let request = DestroyRequest {
            target: Some(id.into()),
            revision,
        };
        let _: DestroyResponse = self.call(id, METHOD_DESTROY, &request, revision, cancel).await?;
        Ok(())
    }
}
