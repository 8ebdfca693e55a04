//! Revision - a read/write handle on one session at one revision
//!
//! Callers do not care whether the session lives on this peer. A local
//! revision talks to the authoritative [`State`]; a remote one goes through
//! the peer's [`RemoteSession`] cache; a closed one fails every call with
//! `NotFound`. Writes hand back a new `Revision` and leave `self` as it was.

use crate::remote::RemoteSession;
use crate::state::State;
use std::sync::Arc;
use tether_model::{Attr, Namespace, Ref, RevisionNumber, SessionError};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug)]
pub enum Revision {
    Local {
        state: Arc<State>,
        revision: RevisionNumber,
        namespace: Namespace,
    },
    Remote {
        session: Arc<RemoteSession>,
        revision: RevisionNumber,
        namespace: Namespace,
    },
    Closed {
        session_ref: Ref,
        namespace: Namespace,
    },
}

impl Revision {
    pub fn local(state: Arc<State>, revision: RevisionNumber, namespace: Namespace) -> Self {
        Revision::Local { state, revision, namespace }
    }

    pub fn remote(session: Arc<RemoteSession>, revision: RevisionNumber, namespace: Namespace) -> Self {
        Revision::Remote { session, revision, namespace }
    }

    pub fn session_ref(&self) -> Ref {
        match self {
            Revision::Local { state, revision, .. } => Ref::new(state.id(), *revision),
            Revision::Remote { session, revision, .. } => Ref::new(session.id(), *revision),
            Revision::Closed { session_ref, .. } => *session_ref,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        match self {
            Revision::Local { namespace, .. } | Revision::Remote { namespace, .. } | Revision::Closed { namespace, .. } => {
                namespace
            }
        }
    }

    /// The same session and revision, reading and writing `namespace` instead.
    pub fn with_namespace(&self, namespace: Namespace) -> Revision {
        let mut revision = self.clone();
        match &mut revision {
            Revision::Local { namespace: ns, .. } | Revision::Remote { namespace: ns, .. } | Revision::Closed { namespace: ns, .. } => {
                *ns = namespace
            }
        }
        revision
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Revision::Closed { .. })
    }

    fn at(&self, revision: RevisionNumber) -> Revision {
        match self {
            Revision::Local { state, namespace, .. } => Revision::local(state.clone(), revision, namespace.clone()),
            Revision::Remote { session, namespace, .. } => Revision::remote(session.clone(), revision, namespace.clone()),
            Revision::Closed { .. } => self.clone(),
        }
    }

    fn closed(&self) -> Revision {
        Revision::Closed {
            session_ref: self.session_ref(),
            namespace: self.namespace().clone(),
        }
    }

    /// The session's current revision.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<Revision, SessionError> {
        match self {
            Revision::Local { state, .. } => Ok(self.at(state.current()?.revision)),
            Revision::Remote { session, namespace, .. } => Ok(self.at(session.refresh(cancel, namespace).await?)),
            Revision::Closed { session_ref, .. } => Err(SessionError::NotFound(session_ref.id)),
        }
    }

    pub async fn get(&self, cancel: &CancellationToken, key: &str) -> Result<Attr, SessionError> {
        match self {
            Revision::Local { state, revision, namespace } => state.at(*revision)?.get(namespace, key),
            _ => {
                let mut attrs = self.get_many(cancel, &[key]).await?;
                attrs
                    .pop()
                    .ok_or_else(|| SessionError::Protocol(format!("no value for {:?}", key)))
            }
        }
    }

    /// Values of `keys` at this revision, in order.
    pub async fn get_many<K: AsRef<str>>(&self, cancel: &CancellationToken, keys: &[K]) -> Result<Vec<Attr>, SessionError> {
        match self {
            Revision::Local { state, revision, namespace } => state.at(*revision)?.get_many(namespace, keys),
            Revision::Remote { session, revision, namespace } => {
                let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();
                session.fetch(cancel, *revision, namespace, &keys).await
            }
            Revision::Closed { session_ref, .. } => Err(SessionError::NotFound(session_ref.id)),
        }
    }

    /// Apply `attrs` atomically. Returns the resulting revision, which is
    /// `self` again when nothing changed.
    pub async fn update(&self, cancel: &CancellationToken, attrs: Vec<Attr>) -> Result<Revision, SessionError> {
        match self {
            Revision::Local { state, revision, namespace } => {
                let (current, _) = state.try_update(&Ref::new(state.id(), *revision), namespace, attrs)?;
                Ok(self.at(current.revision))
            }
            Revision::Remote { session, revision, namespace } => {
                Ok(self.at(session.try_update(cancel, *revision, namespace, attrs).await?))
            }
            Revision::Closed { session_ref, .. } => Err(SessionError::NotFound(session_ref.id)),
        }
    }

    /// Empty every attribute of this namespace.
    pub async fn clear(&self, cancel: &CancellationToken) -> Result<Revision, SessionError> {
        match self {
            Revision::Local { state, revision, namespace } => {
                let (current, _) = state.try_clear(&Ref::new(state.id(), *revision), namespace)?;
                Ok(self.at(current.revision))
            }
            Revision::Remote { session, revision, namespace } => {
                Ok(self.at(session.try_clear(cancel, *revision, namespace).await?))
            }
            Revision::Closed { session_ref, .. } => Err(SessionError::NotFound(session_ref.id)),
        }
    }

    /// Destroy the session. Destroying an already closed revision succeeds.
    pub async fn destroy(&self, cancel: &CancellationToken) -> Result<Revision, SessionError> {
        match self {
            Revision::Local { state, revision, .. } => state.try_destroy(&Ref::new(state.id(), *revision))?,
            Revision::Remote { session, revision, .. } => session.try_destroy(cancel, *revision).await?,
            Revision::Closed { .. } => {}
        }
        Ok(self.closed())
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.session_ref(), self.namespace())
    }
}
