//! SessionServer - executes session commands against locally owned state

use crate::local::LocalSessions;
use crate::proto::{
    ClearRequest, ClearResponse, DestroyRequest, DestroyResponse, FetchRequest, FetchResponse, SessionTarget,
    UpdateRequest, UpdateResponse, WireVAttr, METHOD_CLEAR, METHOD_DESTROY, METHOD_FETCH, METHOD_UPDATE,
};
use async_trait::async_trait;
use prost::Message;
use std::sync::Arc;
use tether_model::{Attr, Namespace, PeerId, Ref, SessionError, SessionId};
use tether_net::{failure_code, Failure, RpcHandler};

/// RPC handler for the `session` service.
pub struct SessionServer {
    sessions: Arc<LocalSessions>,
}

impl SessionServer {
    pub fn new(sessions: Arc<LocalSessions>) -> Self {
        Self { sessions }
    }

    /// Current stamps of the requested keys that exist. Whether they answer
    /// the caller's revision is for the caller to judge.
    fn fetch(&self, req: FetchRequest) -> Result<FetchResponse, SessionError> {
        let id = target(req.target.as_ref())?;
        let namespace = Namespace::new(req.namespace)?;
        let snapshot = self.sessions.get(&id)?.at(req.revision)?;

        let attrs = match snapshot.table(&namespace) {
            Some(table) => req
                .keys
                .iter()
                .filter_map(|key| table.get(key))
                .map(WireVAttr::from)
                .collect(),
            None => Vec::new(),
        };
        Ok(FetchResponse {
            revision: snapshot.latest(),
            attrs,
        })
    }

    fn update(&self, req: UpdateRequest) -> Result<UpdateResponse, SessionError> {
        let id = target(req.target.as_ref())?;
        let namespace = Namespace::new(req.namespace)?;
        let attrs: Vec<Attr> = req.attrs.into_iter().map(Attr::from).collect();
        let state = self.sessions.get(&id)?;
        let (current, _, stamps) = state.apply_update(&Ref::new(id, req.revision), &namespace, attrs)?;
        let (created_at, updated_at): (Vec<_>, Vec<_>) = stamps.into_iter().unzip();
        Ok(UpdateResponse {
            revision: current.revision,
            created_at,
            updated_at,
        })
    }

    fn clear(&self, req: ClearRequest) -> Result<ClearResponse, SessionError> {
        let id = target(req.target.as_ref())?;
        let namespace = Namespace::new(req.namespace)?;
        let (current, _) = self.sessions.get(&id)?.try_clear(&Ref::new(id, req.revision), &namespace)?;
        Ok(ClearResponse {
            revision: current.revision,
        })
    }

    fn destroy(&self, req: DestroyRequest) -> Result<DestroyResponse, SessionError> {
        let id = target(req.target.as_ref())?;
        self.sessions.get(&id)?.try_destroy(&Ref::new(id, req.revision))?;
        Ok(DestroyResponse {})
    }
}

fn target(target: Option<&SessionTarget>) -> Result<SessionId, SessionError> {
    let target = target.ok_or_else(|| SessionError::Protocol("request without target session".into()))?;
    SessionId::try_from(target).map_err(SessionError::Protocol)
}

fn decode<M: Message + Default>(payload: &[u8]) -> Result<M, Failure> {
    M::decode(payload).map_err(|e| Failure::new(failure_code::BAD_REQUEST, e.to_string()))
}

fn respond<M: Message>(result: Result<M, SessionError>) -> Result<Vec<u8>, Failure> {
    result.map(|m| m.encode_to_vec()).map_err(|e| to_failure(&e))
}

/// Wire form of a session error. Carries what the caller needs to rebuild it.
pub fn to_failure(err: &SessionError) -> Failure {
    let message = err.to_string();
    match err {
        SessionError::NotFound(_) => Failure::new(failure_code::NOT_FOUND, message),
        SessionError::StaleUpdate { current, .. } => {
            Failure::new(failure_code::STALE_UPDATE, message).with_revision(*current)
        }
        SessionError::StaleFetch { revision, keys, .. } => Failure::new(failure_code::STALE_FETCH, message)
            .with_revision(*revision)
            .with_keys(keys.clone()),
        SessionError::FrozenAttributes { keys, .. } => {
            Failure::new(failure_code::FROZEN_ATTRIBUTES, message).with_keys(keys.clone())
        }
        SessionError::FutureRevision { current, .. } => {
            Failure::new(failure_code::FUTURE_REVISION, message).with_revision(*current)
        }
        SessionError::InvalidNamespace(name) => Failure::new(failure_code::INVALID_NAMESPACE, name.as_str()),
        SessionError::Protocol(_) => Failure::new(failure_code::BAD_REQUEST, message),
        SessionError::Transport(_) | SessionError::Cancelled | SessionError::Timeout | SessionError::Poisoned => {
            Failure::new(failure_code::INTERNAL, message)
        }
    }
}

#[async_trait]
impl RpcHandler for SessionServer {
    async fn handle(&self, remote: PeerId, method: &str, payload: Vec<u8>) -> Result<Vec<u8>, Failure> {
        tracing::debug!(remote = %remote.fmt_short(), method, "Session request");
        match method {
            METHOD_FETCH => respond(self.fetch(decode(&payload)?)),
            METHOD_UPDATE => respond(self.update(decode(&payload)?)),
            METHOD_CLEAR => respond(self.clear(decode(&payload)?)),
            METHOD_DESTROY => respond(self.destroy(decode(&payload)?)),
            _ => Err(Failure::new(
                failure_code::UNKNOWN_METHOD,
                format!("session service has no method {:?}", method),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> (SessionServer, Arc<LocalSessions>) {
        let sessions = Arc::new(LocalSessions::new(PeerId::random()));
        (SessionServer::new(sessions.clone()), sessions)
    }

    fn wire_update(id: SessionId, revision: u32, attrs: &[Attr]) -> UpdateRequest {
        UpdateRequest {
            target: Some(id.into()),
            revision,
            namespace: "app".into(),
            attrs: attrs.iter().map(Into::into).collect(),
        }
    }

    #[test]
    fn test_fetch_returns_existing_keys_only() {
        let (server, sessions) = server();
        let id = sessions.create().unwrap().id();
        server.update(wire_update(id, 0, &[Attr::new("a", "1")])).unwrap();

        let reply = server
            .fetch(FetchRequest {
                target: Some(id.into()),
                revision: 1,
                namespace: "app".into(),
                keys: vec!["a".into(), "missing".into()],
            })
            .unwrap();
        assert_eq!(reply.revision, 1);
        assert_eq!(reply.attrs.len(), 1);
        assert_eq!(reply.attrs[0].updated_at, 1);
    }

    #[test]
    fn test_fetch_returns_current_stamps() {
        let (server, sessions) = server();
        let id = sessions.create().unwrap().id();
        server.update(wire_update(id, 0, &[Attr::new("a", "1")])).unwrap();
        server.update(wire_update(id, 1, &[Attr::new("a", "2")])).unwrap();

        let reply = server
            .fetch(FetchRequest {
                target: Some(id.into()),
                revision: 1,
                namespace: "app".into(),
                keys: vec!["a".into()],
            })
            .unwrap();
        assert_eq!(reply.revision, 2);
        assert_eq!(reply.attrs[0].created_at, 1);
        assert_eq!(reply.attrs[0].updated_at, 2);

        let err = server
            .fetch(FetchRequest {
                target: Some(id.into()),
                revision: 9,
                namespace: "app".into(),
                keys: vec![],
            })
            .unwrap_err();
        let failure = to_failure(&err);
        assert_eq!(failure.code, failure_code::FUTURE_REVISION);
        assert_eq!(failure.revision, 2);
    }

    #[test]
    fn test_update_reply_stamps() {
        let (server, sessions) = server();
        let id = sessions.create().unwrap().id();
        server.update(wire_update(id, 0, &[Attr::new("a", "1")])).unwrap();

        let reply = server
            .update(wire_update(id, 1, &[Attr::new("a", "1"), Attr::new("b", "2")]))
            .unwrap();
        assert_eq!(reply.revision, 2);
        assert_eq!(reply.created_at, vec![1, 2]);
        assert_eq!(reply.updated_at, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_handle_maps_errors() {
        let (server, sessions) = server();
        let id = sessions.create().unwrap().id();
        let remote = PeerId::random();

        let failure = server.handle(remote, "nope", Vec::new()).await.unwrap_err();
        assert_eq!(failure.code, failure_code::UNKNOWN_METHOD);

        let failure = server.handle(remote, METHOD_FETCH, vec![0xff, 0xff]).await.unwrap_err();
        assert_eq!(failure.code, failure_code::BAD_REQUEST);

        let payload = wire_update(id, 3, &[Attr::new("a", "1")]).encode_to_vec();
        let failure = server.handle(remote, METHOD_UPDATE, payload).await.unwrap_err();
        assert_eq!(failure.code, failure_code::STALE_UPDATE);
        assert_eq!(failure.revision, 0);

        let mut bad_ns = wire_update(id, 0, &[]);
        bad_ns.namespace = "_hidden".into();
        let failure = server.handle(remote, METHOD_UPDATE, bad_ns.encode_to_vec()).await.unwrap_err();
        assert_eq!(failure.code, failure_code::INVALID_NAMESPACE);

        let destroy = DestroyRequest { target: Some(id.into()), revision: 0 };
        server.handle(remote, METHOD_DESTROY, destroy.encode_to_vec()).await.unwrap();
        let failure = server.handle(remote, METHOD_DESTROY, destroy.encode_to_vec()).await.unwrap_err();
        assert_eq!(failure.code, failure_code::NOT_FOUND);
    }
}
