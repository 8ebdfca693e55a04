//! SessionRpc - the remote half of a session, as seen by the cache

use async_trait::async_trait;
use tether_model::{Attr, Namespace, RevisionNumber, SessionError, SessionId, VAttr};
use tokio_util::sync::CancellationToken;

/// Answer to a fetch: the owner's revision at answer time and the requested
/// keys that exist there, with their stamps.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchReply {
    pub revision: RevisionNumber,
    pub attrs: Vec<VAttr>,
}

/// Answer to an update. Stamps are in submission order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateReply {
    pub revision: RevisionNumber,
    pub created_at: Vec<RevisionNumber>,
    pub updated_at: Vec<RevisionNumber>,
}

/// Session commands executed by the owning peer.
///
/// Implemented over the wire by [`SessionClient`](crate::SessionClient).
#[async_trait]
pub trait SessionRpc: Send + Sync {
    async fn fetch(
        &self,
        id: SessionId,
        revision: RevisionNumber,
        namespace: &Namespace,
        keys: &[String],
        cancel: &CancellationToken,
    ) -> Result<FetchReply, SessionError>;

    async fn update(
        &self,
        id: SessionId,
        revision: RevisionNumber,
        namespace: &Namespace,
        attrs: &[Attr],
        cancel: &CancellationToken,
    ) -> Result<UpdateReply, SessionError>;

    async fn clear(
        &self,
        id: SessionId,
        revision: RevisionNumber,
        namespace: &Namespace,
        cancel: &CancellationToken,
    ) -> Result<RevisionNumber, SessionError>;

    async fn destroy(&self, id: SessionId, revision: RevisionNumber, cancel: &CancellationToken) -> Result<(), SessionError>;
}
