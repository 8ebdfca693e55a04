//! State - the authoritative attribute catalog of a session on its owning peer
//!
//! All mutations go through one exclusive lock and compare the caller's
//! revision against the current one before touching anything. Namespace
//! tables are copied before they change, so a [`Snapshot`] taken earlier keeps
//! reading the catalog it captured.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tether_model::{
    Attr, Catalog, Diff, Namespace, Ref, RevisionNumber, SessionError, SessionId, Table, VAttr, Visibility,
};

/// `(created_at, updated_at)` of one attribute.
pub(crate) type Stamp = (RevisionNumber, RevisionNumber);

fn stamps_of(table: Option<&Table>, keys: &[String], revision: RevisionNumber) -> Vec<Stamp> {
    keys.iter()
        .map(|key| {
            table
                .and_then(|t| t.get(key))
                .map(|v| (v.created_at, v.updated_at))
                .unwrap_or((revision, revision))
        })
        .collect()
}

struct Inner {
    revision: RevisionNumber,
    catalog: Arc<Catalog>,
    closed: bool,
    message_seq: u64,
}

type CloseHook = Box<dyn Fn(SessionId) + Send + Sync>;

/// Single source of truth for one session's attributes.
pub struct State {
    id: SessionId,
    inner: RwLock<Inner>,
    on_close: Option<CloseHook>,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State").field("id", &self.id).finish_non_exhaustive()
    }
}

impl State {
    /// A fresh session at revision 0 with no attributes.
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            inner: RwLock::new(Inner {
                revision: 0,
                catalog: Arc::new(Catalog::new()),
                closed: false,
                message_seq: 0,
            }),
            on_close: None,
        }
    }

    /// Like [`State::new`], calling `hook` once when the session closes.
    ///
    /// The hook runs after the state lock is released.
    pub fn with_close_hook(id: SessionId, hook: impl Fn(SessionId) + Send + Sync + 'static) -> Self {
        Self {
            on_close: Some(Box::new(hook)),
            ..Self::new(id)
        }
    }

    fn closed_now(&self) {
        if let Some(hook) = &self.on_close {
            hook(self.id);
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

    /// Reference to the current revision.
    pub fn current(&self) -> Result<Ref, SessionError> {
        let inner = self.read()?;
        if inner.closed {
            return Err(SessionError::NotFound(self.id));
        }
        Ok(Ref::new(self.id, inner.revision))
    }

    pub fn is_closed(&self) -> bool {
        self.read().map(|inner| inner.closed).unwrap_or(true)
    }

    /// Mutation preconditions: right session, still open, caller at the current revision.
    fn check_writable(&self, inner: &Inner, r: &Ref) -> Result<(), SessionError> {
        if r.id != self.id || inner.closed {
            return Err(SessionError::NotFound(r.id));
        }
        if r.revision != inner.revision {
            return Err(SessionError::StaleUpdate {
                id: self.id,
                requested: r.revision,
                current: inner.revision,
            });
        }
        Ok(())
    }

    fn next_revision(&self, inner: &Inner) -> Result<RevisionNumber, SessionError> {
        inner
            .revision
            .checked_add(1)
            .ok_or_else(|| SessionError::Protocol(format!("revision counter of {} exhausted", self.id)))
    }

    /// Result of a write that changed nothing.
    fn unchanged(&self, inner: &Inner, namespace: &Namespace) -> (Ref, Diff) {
        (Ref::new(self.id, inner.revision), Diff::new(namespace.clone(), inner.revision))
    }

    /// Install `table` for `namespace` at the next revision.
    fn commit(inner: &mut Inner, namespace: &Namespace, table: Table, revision: RevisionNumber) {
        inner.catalog = Arc::new(inner.catalog.with_table(namespace.clone(), table));
        inner.revision = revision;
        inner.message_seq = 0;
    }

    /// Apply `attrs` to `namespace` atomically.
    ///
    /// Attributes that would not change anything are skipped. If nothing is
    /// left, the current ref comes back with an empty diff and the revision
    /// does not move.
    pub fn try_update(&self, r: &Ref, namespace: &Namespace, attrs: Vec<Attr>) -> Result<(Ref, Diff), SessionError> {
        self.apply_update(r, namespace, attrs).map(|(r, diff, _)| (r, diff))
    }

    /// [`State::try_update`], also returning the `(created_at, updated_at)` of
    /// every submitted key at the resulting revision, in submission order.
    /// Keys that were never set report the resulting revision for both.
    pub(crate) fn apply_update(
        &self,
        r: &Ref,
        namespace: &Namespace,
        attrs: Vec<Attr>,
    ) -> Result<(Ref, Diff, Vec<Stamp>), SessionError> {
        let keys: Vec<String> = attrs.iter().map(|a| a.key.clone()).collect();
        let mut inner = self.write()?;
        self.check_writable(&inner, r)?;

        let base = inner.catalog.table(namespace).cloned();
        let base_attr = |key: &str| -> Attr {
            base.as_ref()
                .and_then(|t| t.get(key))
                .map(|v| v.attr.clone())
                .unwrap_or_else(|| Attr::empty(key))
        };

        let mut pending: Vec<Attr> = Vec::new();
        let mut frozen: Vec<String> = Vec::new();
        for attr in attrs {
            let slot = pending.iter().position(|p| p.key == attr.key);
            let current = match slot {
                Some(i) => pending[i].clone(),
                None => base_attr(&attr.key),
            };
            if current.same_state(&attr) {
                continue;
            }
            if current.frozen {
                if !frozen.contains(&attr.key) {
                    frozen.push(attr.key);
                }
                continue;
            }
            match slot {
                Some(i) => pending[i] = attr,
                None => pending.push(attr),
            }
        }

        if !frozen.is_empty() {
            return Err(SessionError::FrozenAttributes { id: self.id, keys: frozen });
        }

        // A key may have been changed and changed back within the same batch.
        pending.retain(|attr| !base_attr(&attr.key).same_state(attr));
        if pending.is_empty() {
            let (current, diff) = self.unchanged(&inner, namespace);
            let stamps = stamps_of(base.as_deref(), &keys, current.revision);
            return Ok((current, diff, stamps));
        }

        let next = self.next_revision(&inner)?;
        let mut table = base.as_deref().cloned().unwrap_or_default();
        let mut diff = Diff::new(namespace.clone(), next);
        for attr in pending {
            let created_at = table.get(&attr.key).map(|v| v.created_at).unwrap_or(next);
            let vattr = VAttr::new(attr, created_at, next);
            table.insert(vattr.clone());
            diff.push(vattr);
        }
        let stamps = stamps_of(Some(&table), &keys, next);
        Self::commit(&mut inner, namespace, table, next);

        tracing::debug!(
            session = %self.id,
            namespace = %namespace,
            revision = next,
            created = diff.created().count(),
            updated = diff.updated().count(),
            "Session updated"
        );
        Ok((Ref::new(self.id, next), diff, stamps))
    }

    /// Empty every non-empty attribute of `namespace`.
    ///
    /// All or nothing: a frozen non-empty attribute fails the whole clear.
    pub fn try_clear(&self, r: &Ref, namespace: &Namespace) -> Result<(Ref, Diff), SessionError> {
        let mut inner = self.write()?;
        self.check_writable(&inner, r)?;

        let Some(base) = inner.catalog.table(namespace).cloned() else {
            return Ok(self.unchanged(&inner, namespace));
        };

        let mut frozen: Vec<String> = base
            .iter()
            .filter(|v| v.is_frozen() && !v.attr.is_empty())
            .map(|v| v.key().to_string())
            .collect();
        if !frozen.is_empty() {
            frozen.sort();
            return Err(SessionError::FrozenAttributes { id: self.id, keys: frozen });
        }

        let mut to_clear: Vec<&VAttr> = base.iter().filter(|v| !v.attr.is_empty()).collect();
        if to_clear.is_empty() {
            return Ok(self.unchanged(&inner, namespace));
        }
        to_clear.sort_by(|a, b| a.key().cmp(b.key()));

        let next = self.next_revision(&inner)?;
        let mut table = (*base).clone();
        let mut diff = Diff::new(namespace.clone(), next);
        for old in to_clear {
            let vattr = VAttr::new(Attr::empty(old.key()), old.created_at, next);
            table.insert(vattr.clone());
            diff.push(vattr);
        }
        Self::commit(&mut inner, namespace, table, next);

        tracing::debug!(
            session = %self.id,
            namespace = %namespace,
            revision = next,
            cleared = diff.len(),
            "Session cleared"
        );
        Ok((Ref::new(self.id, next), diff))
    }

    /// Close the session. Repeating the call at its last valid ref succeeds.
    pub fn try_destroy(&self, r: &Ref) -> Result<(), SessionError> {
        let mut inner = self.write()?;
        if r.id != self.id {
            return Err(SessionError::NotFound(r.id));
        }
        if inner.closed {
            return if r.revision == inner.revision {
                Ok(())
            } else {
                Err(SessionError::NotFound(self.id))
            };
        }
        self.check_writable(&inner, r)?;
        inner.closed = true;
        tracing::debug!(session = %self.id, revision = inner.revision, "Session destroyed");
        drop(inner);
        self.closed_now();
        Ok(())
    }

    /// Close the session regardless of revision. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        let closed = match self.inner.write() {
            Ok(mut inner) => !std::mem::replace(&mut inner.closed, true),
            Err(_) => false,
        };
        if closed {
            self.closed_now();
        }
        closed
    }

    /// A read handle for the catalog as of `revision`.
    pub fn at(&self, revision: RevisionNumber) -> Result<Snapshot, SessionError> {
        let inner = self.read()?;
        if inner.closed {
            return Err(SessionError::NotFound(self.id));
        }
        if revision > inner.revision {
            return Err(SessionError::FutureRevision {
                id: self.id,
                requested: revision,
                current: inner.revision,
            });
        }
        Ok(Snapshot {
            id: self.id,
            revision,
            latest: inner.revision,
            catalog: inner.catalog.clone(),
        })
    }

    /// Per-session message sequence number; restarts after every effective mutation.
    pub fn next_message_id(&self) -> Result<u64, SessionError> {
        let mut inner = self.write()?;
        if inner.closed {
            return Err(SessionError::NotFound(self.id));
        }
        inner.message_seq += 1;
        Ok(inner.message_seq)
    }
}

/// Immutable view of a session's catalog, answering reads at one revision.
#[derive(Clone, Debug)]
pub struct Snapshot {
    id: SessionId,
    revision: RevisionNumber,
    latest: RevisionNumber,
    catalog: Arc<Catalog>,
}

impl Snapshot {
    pub fn revision(&self) -> RevisionNumber {
        self.revision
    }

    /// Revision of the catalog captured by this snapshot.
    pub fn latest(&self) -> RevisionNumber {
        self.latest
    }

    /// Value of `key` at this snapshot's revision, or `None` if it changed since.
    fn resolve(&self, namespace: &Namespace, key: &str) -> Option<Attr> {
        match self.catalog.get(namespace, key) {
            None => Some(Attr::empty(key)),
            Some(v) => match v.visibility_at(self.revision) {
                Visibility::Absent => Some(Attr::empty(key)),
                Visibility::Current => Some(v.attr.clone()),
                Visibility::Stale => None,
            },
        }
    }

    pub fn get(&self, namespace: &Namespace, key: &str) -> Result<Attr, SessionError> {
        self.resolve(namespace, key).ok_or_else(|| SessionError::StaleFetch {
            id: self.id,
            revision: self.revision,
            keys: vec![key.to_string()],
        })
    }

    /// Values of `keys`, in order. Fails if any of them changed after this revision.
    pub fn get_many<K: AsRef<str>>(&self, namespace: &Namespace, keys: &[K]) -> Result<Vec<Attr>, SessionError> {
        let mut attrs = Vec::with_capacity(keys.len());
        let mut stale = Vec::new();
        for key in keys {
            match self.resolve(namespace, key.as_ref()) {
                Some(attr) => attrs.push(attr),
                None => stale.push(key.as_ref().to_string()),
            }
        }
        if !stale.is_empty() {
            return Err(SessionError::StaleFetch {
                id: self.id,
                revision: self.revision,
                keys: stale,
            });
        }
        Ok(attrs)
    }

    /// Current state of every attribute of `namespace` (including not-yet-visible ones).
    pub fn table(&self, namespace: &Namespace) -> Option<Arc<Table>> {
        self.catalog.table(namespace).cloned()
    }
}
