//! RemoteSession - read-through cache of a session owned by another peer
//!
//! Reads are answered from the cache whenever the cached stamps prove the
//! value at the requested revision; everything else goes to the owner through
//! [`SessionRpc`]. Writes are pre-checked against what the cache knows and
//! always decided by the owner. The lock is never held across an RPC; replies
//! are folded back in after re-acquiring it.

use crate::rpc::SessionRpc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tether_model::{Attr, Namespace, RevisionNumber, SessionError, SessionId, VAttr, Visibility};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Cached {
    Known(VAttr),
    /// The owner reported no such key.
    Absent,
}

#[derive(Clone, Debug)]
struct CachedAttr {
    cached: Cached,
    /// Owner revision of the reply this entry came from.
    fetched_at: RevisionNumber,
}

enum Resolved {
    Value(Attr),
    Unknown,
    Stale,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<Namespace, HashMap<String, CachedAttr>>,
    highest_rev: RevisionNumber,
    closed: bool,
}

impl Inner {
    fn entry(&self, namespace: &Namespace, key: &str) -> Option<&CachedAttr> {
        self.tables.get(namespace).and_then(|t| t.get(key))
    }

    fn resolve(&self, namespace: &Namespace, key: &str, revision: RevisionNumber) -> Resolved {
        let Some(entry) = self.entry(namespace, key) else {
            return Resolved::Unknown;
        };
        match &entry.cached {
            Cached::Absent if entry.fetched_at >= revision => Resolved::Value(Attr::empty(key)),
            Cached::Absent => Resolved::Unknown,
            Cached::Known(vattr) => match vattr.visibility_at(revision) {
                Visibility::Absent => Resolved::Value(Attr::empty(key)),
                Visibility::Current => Resolved::Value(vattr.attr.clone()),
                Visibility::Stale => Resolved::Stale,
            },
        }
    }

    /// Store `incoming` unless the cache already holds a newer answer for `key`.
    fn merge(&mut self, namespace: &Namespace, key: String, incoming: CachedAttr) {
        let table = self.tables.entry(namespace.clone()).or_default();
        match table.get(&key) {
            Some(existing) if existing.fetched_at > incoming.fetched_at => {}
            _ => {
                table.insert(key, incoming);
            }
        }
    }

    fn check_writable(&self, id: SessionId, revision: RevisionNumber) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::NotFound(id));
        }
        if self.highest_rev > revision {
            return Err(SessionError::StaleUpdate {
                id,
                requested: revision,
                current: self.highest_rev,
            });
        }
        Ok(())
    }

    /// Bookkeeping common to every reply from the owner.
    fn observe(&mut self, result: Result<RevisionNumber, &SessionError>) {
        match result {
            Ok(revision) => self.highest_rev = self.highest_rev.max(revision),
            Err(SessionError::NotFound(_)) => self.closed = true,
            Err(SessionError::StaleUpdate { current, .. }) | Err(SessionError::FutureRevision { current, .. }) => {
                self.highest_rev = self.highest_rev.max(*current)
            }
            Err(_) => {}
        }
    }
}

/// A non-owning peer's view of one remote session.
pub struct RemoteSession {
    id: SessionId,
    rpc: Arc<dyn SessionRpc>,
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession").field("id", &self.id).finish_non_exhaustive()
    }
}

impl RemoteSession {
    pub fn new(id: SessionId, rpc: Arc<dyn SessionRpc>) -> Self {
        Self {
            id,
            rpc,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, SessionError> {
        self.inner.read().map_err(|_| SessionError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, SessionError> {
        self.inner.write().map_err(|_| SessionError::Poisoned)
    }

    /// Lowest revision the owner can still be at, as far as this peer has seen.
    pub fn highest_revision(&self) -> RevisionNumber {
        self.read().map(|inner| inner.highest_rev).unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.read().map(|inner| inner.closed).unwrap_or(true)
    }

    /// Fold the outcome of an owner call into the session's bookkeeping:
    /// `NotFound` closes the session, a revision raises `highest_revision`.
    pub fn update_state(&self, result: &Result<RevisionNumber, SessionError>) {
        if let Ok(mut inner) = self.inner.write() {
            inner.observe(result.as_ref().copied());
        }
    }

    /// Values of `keys` at `revision`.
    ///
    /// Only keys the cache cannot answer are fetched. Everything the owner
    /// returns is cached before any stale key fails the call.
    pub async fn fetch(
        &self,
        cancel: &CancellationToken,
        revision: RevisionNumber,
        namespace: &Namespace,
        keys: &[String],
    ) -> Result<Vec<Attr>, SessionError> {
        let unknown: Vec<String> = {
            let inner = self.read()?;
            if inner.closed {
                return Err(SessionError::NotFound(self.id));
            }
            let mut unknown: Vec<String> = Vec::new();
            for key in keys {
                if matches!(inner.resolve(namespace, key, revision), Resolved::Unknown) && !unknown.contains(key) {
                    unknown.push(key.clone());
                }
            }
            unknown
        };

        if !unknown.is_empty() {
            tracing::trace!(session = %self.id, revision, missing = unknown.len(), "Cache miss");
            let result = self.rpc.fetch(self.id, revision, namespace, &unknown, cancel).await;
            let mut inner = self.write()?;
            inner.observe(result.as_ref().map(|reply| reply.revision));
            let reply = result?;
            if inner.closed {
                return Err(SessionError::NotFound(self.id));
            }

            for vattr in reply.attrs {
                let key = vattr.attr.key.clone();
                let entry = CachedAttr {
                    cached: Cached::Known(vattr),
                    fetched_at: reply.revision,
                };
                inner.merge(namespace, key, entry);
            }
            for key in unknown {
                if inner.entry(namespace, &key).map_or(true, |e| e.fetched_at < reply.revision) {
                    let entry = CachedAttr {
                        cached: Cached::Absent,
                        fetched_at: reply.revision,
                    };
                    inner.merge(namespace, key, entry);
                }
            }
        }

        let inner = self.read()?;
        let mut attrs = Vec::with_capacity(keys.len());
        let mut stale = Vec::new();
        for key in keys {
            match inner.resolve(namespace, key, revision) {
                Resolved::Value(attr) => attrs.push(attr),
                Resolved::Stale => stale.push(key.clone()),
                Resolved::Unknown => {
                    return Err(SessionError::Protocol(format!("{} left key {:?} unanswered", self.id, key)));
                }
            }
        }
        if !stale.is_empty() {
            return Err(SessionError::StaleFetch {
                id: self.id,
                revision,
                keys: stale,
            });
        }
        Ok(attrs)
    }

    /// Write `attrs` at `revision`, returning the owner's resulting revision.
    ///
    /// Attributes the cache proves unchanged at exactly `revision` are not
    /// sent; if none remain the call returns `revision` without a round trip.
    pub async fn try_update(
        &self,
        cancel: &CancellationToken,
        revision: RevisionNumber,
        namespace: &Namespace,
        attrs: Vec<Attr>,
    ) -> Result<RevisionNumber, SessionError> {
        let to_send: Vec<Attr> = {
            let inner = self.read()?;
            inner.check_writable(self.id, revision)?;

            let mut frozen: Vec<String> = Vec::new();
            let mut to_send = Vec::with_capacity(attrs.len());
            for attr in attrs {
                let entry = inner.entry(namespace, &attr.key);
                let unchanged = match entry {
                    Some(CachedAttr { cached: Cached::Known(v), fetched_at }) => {
                        if v.is_frozen() && !v.attr.same_state(&attr) {
                            if !frozen.contains(&attr.key) {
                                frozen.push(attr.key.clone());
                            }
                            continue;
                        }
                        *fetched_at >= revision && v.attr.same_state(&attr)
                    }
                    Some(CachedAttr { cached: Cached::Absent, fetched_at }) => {
                        *fetched_at >= revision && Attr::empty(attr.key.as_str()).same_state(&attr)
                    }
                    None => false,
                };
                if !unchanged {
                    to_send.push(attr);
                }
            }
            if !frozen.is_empty() {
                return Err(SessionError::FrozenAttributes { id: self.id, keys: frozen });
            }
            to_send
        };

        if to_send.is_empty() {
            return Ok(revision);
        }

        let result = self.rpc.update(self.id, revision, namespace, &to_send, cancel).await;
        let mut inner = self.write()?;
        inner.observe(result.as_ref().map(|reply| reply.revision));
        let reply = result?;
        // Destroyed while the call was in flight.
        if inner.closed {
            return Err(SessionError::NotFound(self.id));
        }

        for ((attr, created_at), updated_at) in to_send.into_iter().zip(reply.created_at).zip(reply.updated_at) {
            let key = attr.key.clone();
            let entry = CachedAttr {
                cached: Cached::Known(VAttr::new(attr, created_at, updated_at)),
                fetched_at: reply.revision,
            };
            inner.merge(namespace, key, entry);
        }
        tracing::debug!(session = %self.id, namespace = %namespace, revision = reply.revision, "Remote session updated");
        Ok(reply.revision)
    }

    /// Clear `namespace` at `revision`, returning the owner's resulting revision.
    pub async fn try_clear(
        &self,
        cancel: &CancellationToken,
        revision: RevisionNumber,
        namespace: &Namespace,
    ) -> Result<RevisionNumber, SessionError> {
        {
            let inner = self.read()?;
            inner.check_writable(self.id, revision)?;
            if let Some(table) = inner.tables.get(namespace) {
                let mut frozen: Vec<String> = table
                    .values()
                    .filter_map(|e| match &e.cached {
                        Cached::Known(v) if v.is_frozen() && !v.attr.is_empty() => Some(v.key().to_string()),
                        _ => None,
                    })
                    .collect();
                if !frozen.is_empty() {
                    frozen.sort();
                    return Err(SessionError::FrozenAttributes { id: self.id, keys: frozen });
                }
            }
        }

        let result = self.rpc.clear(self.id, revision, namespace, cancel).await;
        let mut inner = self.write()?;
        inner.observe(result.as_ref().copied());
        let cleared = result?;
        if inner.closed {
            return Err(SessionError::NotFound(self.id));
        }

        if cleared != revision {
            if let Some(table) = inner.tables.get_mut(namespace) {
                for entry in table.values_mut() {
                    if entry.fetched_at > cleared {
                        continue;
                    }
                    if let Cached::Known(v) = &entry.cached {
                        if !v.is_frozen() && !v.attr.is_empty() {
                            entry.cached = Cached::Known(VAttr::new(Attr::empty(v.key()), v.created_at, cleared));
                            entry.fetched_at = cleared;
                        }
                    }
                }
            }
        }
        tracing::debug!(session = %self.id, namespace = %namespace, revision = cleared, "Remote session cleared");
        Ok(cleared)
    }

    /// Destroy the session at `revision`. A session the owner no longer knows counts as destroyed.
    pub async fn try_destroy(&self, cancel: &CancellationToken, revision: RevisionNumber) -> Result<(), SessionError> {
        {
            let inner = self.read()?;
            if inner.closed {
                return Ok(());
            }
            inner.check_writable(self.id, revision)?;
        }

        let result = self.rpc.destroy(self.id, revision, cancel).await;
        let mut inner = self.write()?;
        match result {
            Ok(()) | Err(SessionError::NotFound(_)) => {
                inner.closed = true;
                tracing::debug!(session = %self.id, revision, "Remote session destroyed");
                Ok(())
            }
            Err(e) => {
                inner.observe(Err(&e));
                Err(e)
            }
        }
    }

    /// Ask the owner for its current revision.
    pub async fn refresh(&self, cancel: &CancellationToken, namespace: &Namespace) -> Result<RevisionNumber, SessionError> {
        if self.is_closed() {
            return Err(SessionError::NotFound(self.id));
        }
        let result = self.rpc.fetch(self.id, 0, namespace, &[], cancel).await;
        let mut inner = self.write()?;
        inner.observe(result.as_ref().map(|reply| reply.revision));
        Ok(result?.revision)
    }
}
