//! RemoteSessionStore - remote session caches with mark-and-sweep eviction

use crate::remote::RemoteSession;
use crate::rpc::SessionRpc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_model::{SessionError, SessionId};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Entry {
    session: Arc<RemoteSession>,
    marked: bool,
}

/// Every remote session this peer has touched recently.
///
/// An entry survives one to two prune intervals after its last access.
pub struct RemoteSessionStore {
    rpc: Arc<dyn SessionRpc>,
    entries: Mutex<HashMap<SessionId, Entry>>,
}

impl RemoteSessionStore {
    pub fn new(rpc: Arc<dyn SessionRpc>) -> Self {
        Self {
            rpc,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The cache for `id`, created on first use. Counts as an access.
    pub fn get_session(&self, id: SessionId) -> Result<Arc<RemoteSession>, SessionError> {
        let mut entries = self.entries.lock().map_err(|_| SessionError::Poisoned)?;
        let entry = entries.entry(id).or_insert_with(|| Entry {
            session: Arc::new(RemoteSession::new(id, self.rpc.clone())),
            marked: false,
        });
        entry.marked = false;
        Ok(entry.session.clone())
    }

    /// Drop entries marked by the previous sweep, then mark the survivors.
    pub fn prune(&self) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, entry| !entry.marked);
        for entry in entries.values_mut() {
            entry.marked = true;
        }
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run [`RemoteSessionStore::prune`] every `interval` until `cancel` fires.
    pub fn spawn_pruner(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = store.prune();
                        if evicted > 0 {
                            tracing::debug!(evicted, remaining = store.len(), "Pruned remote sessions");
                        }
                    }
                }
            }
            tracing::debug!("Remote session pruner stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{FetchReply, UpdateReply};
    use async_trait::async_trait;
    use tether_model::{Attr, Namespace, PeerId, RevisionNumber};

    /// Owner that never answers; eviction never needs a round trip.
    struct Unreachable;

    #[async_trait]
    impl SessionRpc for Unreachable {
        async fn fetch(
            &self,
            _: SessionId,
            _: RevisionNumber,
            _: &Namespace,
            _: &[String],
            _: &CancellationToken,
        ) -> Result<FetchReply, SessionError> {
            Err(SessionError::Transport("unreachable".into()))
        }

        async fn update(
            &self,
            _: SessionId,
            _: RevisionNumber,
            _: &Namespace,
            _: &[Attr],
            _: &CancellationToken,
        ) -> Result<UpdateReply, SessionError> {
            Err(SessionError::Transport("unreachable".into()))
        }

        async fn clear(
            &self,
            _: SessionId,
            _: RevisionNumber,
            _: &Namespace,
            _: &CancellationToken,
        ) -> Result<RevisionNumber, SessionError> {
            Err(SessionError::Transport("unreachable".into()))
        }

        async fn destroy(&self, _: SessionId, _: RevisionNumber, _: &CancellationToken) -> Result<(), SessionError> {
            Err(SessionError::Transport("unreachable".into()))
        }
    }

    fn store() -> RemoteSessionStore {
        RemoteSessionStore::new(Arc::new(Unreachable))
    }

    #[test]
    fn test_get_session_returns_same_cache() {
        let store = store();
        let id = SessionId::new(PeerId::random(), 1);
        let a = store.get_session(id).unwrap();
        let b = store.get_session(id).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_idle_entry_evicted_after_two_prunes() {
        let store = store();
        store.get_session(SessionId::new(PeerId::random(), 1)).unwrap();

        assert_eq!(store.prune(), 0);
        assert_eq!(store.len(), 1);
        assert_eq!(store.prune(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_accessed_entry_survives() {
        let store = store();
        let id = SessionId::new(PeerId::random(), 1);
        let first = store.get_session(id).unwrap();

        for _ in 0..10 {
            store.prune();
            store.get_session(id).unwrap();
        }
        assert!(Arc::ptr_eq(&first, &store.get_session(id).unwrap()));

        // A fresh entry after eviction starts with an empty cache.
        store.prune();
        store.prune();
        assert!(!Arc::ptr_eq(&first, &store.get_session(id).unwrap()));
    }

    #[tokio::test]
    async fn test_pruner_evicts_and_stops() {
        let store = Arc::new(store());
        store.get_session(SessionId::new(PeerId::random(), 1)).unwrap();

        let cancel = CancellationToken::new();
        let handle = store.spawn_pruner(Duration::from_millis(10), cancel.clone());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.is_empty());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
