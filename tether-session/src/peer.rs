//! Peer - owns every session structure of one process
//!
//! A peer serves its own sessions to the network, caches the remote sessions
//! it touches and hands out [`Revision`]s for both.

use crate::client::SessionClient;
use crate::config::SessionConfig;
use crate::local::LocalSessions;
use crate::proto::SERVICE;
use crate::revision::Revision;
use crate::server::SessionServer;
use crate::store::RemoteSessionStore;
use std::sync::{Arc, Mutex};
use tether_model::{Namespace, PeerId, Ref, SessionError};
use tether_net::{RpcClient, RpcServer};
use tether_net_types::Transport;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct PeerBuilder<T: Transport> {
    transport: T,
    config: SessionConfig,
    cancel: Option<CancellationToken>,
}

impl<T: Transport> PeerBuilder<T> {
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Stop the peer's background tasks together with `cancel`'s other users.
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Register the session service, start accepting and start pruning.
    ///
    /// Must be called within a Tokio runtime.
    #[tracing::instrument(skip(self), fields(peer = %self.transport.local_peer().fmt_short()))]
    pub fn build(self) -> Peer<T> {
        let id = self.transport.local_peer();
        let cancel = self.cancel.unwrap_or_default();

        let local = Arc::new(LocalSessions::new(id));
        let client = SessionClient::new(RpcClient::new(self.transport.clone(), self.config.rpc_timeout));
        let remote = Arc::new(RemoteSessionStore::new(Arc::new(client)));

        let server = RpcServer::new(self.config.stream_idle_timeout);
        server.register(SERVICE, Arc::new(SessionServer::new(local.clone())));

        let tasks = vec![
            server.spawn(self.transport.clone(), cancel.clone()),
            remote.spawn_pruner(self.config.prune_interval, cancel.clone()),
        ];
        tracing::info!("Peer started");

        Peer {
            id,
            transport: self.transport,
            config: self.config,
            local,
            remote,
            server,
            cancel,
            tasks: Mutex::new(tasks),
        }
    }
}

pub struct Peer<T: Transport> {
    id: PeerId,
    transport: T,
    config: SessionConfig,
    local: Arc<LocalSessions>,
    remote: Arc<RemoteSessionStore>,
    server: Arc<RpcServer>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Transport> std::fmt::Debug for Peer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Peer<T> {
    pub fn builder(transport: T) -> PeerBuilder<T> {
        PeerBuilder {
            transport,
            config: SessionConfig::default(),
            cancel: None,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// A new session owned by this peer, at revision 0.
    pub fn create_session(&self, namespace: Namespace) -> Result<Revision, SessionError> {
        let state = self.local.create()?;
        Ok(Revision::local(state, 0, namespace))
    }

    /// Handle on `session_ref`, wherever the session lives.
    ///
    /// Local sessions must exist and not be at a lower revision than asked
    /// for. Remote sessions are not contacted; a cached one known to be
    /// destroyed yields a closed revision.
    pub fn revision(&self, session_ref: Ref, namespace: Namespace) -> Result<Revision, SessionError> {
        if session_ref.id.is_owned_by(&self.id) {
            let state = self.local.get(&session_ref.id)?;
            let current = state.current()?;
            if session_ref.revision > current.revision {
                return Err(SessionError::FutureRevision {
                    id: session_ref.id,
                    requested: session_ref.revision,
                    current: current.revision,
                });
            }
            return Ok(Revision::local(state, session_ref.revision, namespace));
        }

        let session = self.remote.get_session(session_ref.id)?;
        if session.is_closed() {
            return Ok(Revision::Closed { session_ref, namespace });
        }
        Ok(Revision::remote(session, session_ref.revision, namespace))
    }

    pub fn remote_sessions(&self) -> &Arc<RemoteSessionStore> {
        &self.remote
    }

    pub fn local_session_count(&self) -> usize {
        self.local.len()
    }

    /// Close every local session and stop serving and pruning.
    pub async fn dispose(&self) {
        let closed = self.local.close_all();
        self.server.unregister(SERVICE);
        self.cancel.cancel();

        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Peer task ended abnormally");
            }
        }
        tracing::info!(peer = %self.id.fmt_short(), closed, "Peer disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_model::{Attr, SessionId};
    use tether_net_sim::{ChannelNetwork, ChannelTransport};

    fn ns() -> Namespace {
        Namespace::new("app").unwrap()
    }

    #[tokio::test]
    async fn test_local_session_lifecycle() {
        let net = ChannelNetwork::new();
        let peer = Peer::builder(ChannelTransport::new(PeerId([1; 16]), &net).await).build();
        let cancel = CancellationToken::new();

        let r0 = peer.create_session(ns()).unwrap();
        assert_eq!(r0.session_ref().id, SessionId::new(peer.id(), 1));
        assert_eq!(peer.local_session_count(), 1);

        let r1 = r0.update(&cancel, vec![Attr::new("a", "1")]).await.unwrap();
        let again = peer.revision(r1.session_ref(), ns()).unwrap();
        assert_eq!(again.get(&cancel, "a").await.unwrap().value, "1");

        let future = r1.session_ref().at(5);
        assert!(matches!(peer.revision(future, ns()), Err(SessionError::FutureRevision { .. })));

        r1.destroy(&cancel).await.unwrap();
        assert!(peer.revision(r1.session_ref(), ns()).unwrap_err().is_not_found());
        assert_eq!(peer.local_session_count(), 0);

        peer.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_closes_sessions() {
        let net = ChannelNetwork::new();
        let peer = Peer::builder(ChannelTransport::new(PeerId([1; 16]), &net).await).build();
        let cancel = CancellationToken::new();

        let r0 = peer.create_session(ns()).unwrap();
        peer.create_session(ns()).unwrap();
        peer.dispose().await;

        assert_eq!(peer.local_session_count(), 0);
        assert!(r0.get(&cancel, "a").await.unwrap_err().is_not_found());
    }
}
