//! Error taxonomy shared by local and remote session operations

use crate::types::{RevisionNumber, SessionId};
use thiserror::Error;

/// Errors returned by session reads and writes, local or remote.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session was destroyed or never existed on its owning peer.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The caller's revision is behind the authoritative one.
    #[error("stale update on {id}: revision {requested}, current {current}")]
    StaleUpdate {
        id: SessionId,
        requested: RevisionNumber,
        current: RevisionNumber,
    },

    /// A read cannot be answered at the requested revision because the values changed since.
    #[error("stale fetch on {id} at revision {revision}: {keys:?}")]
    StaleFetch {
        id: SessionId,
        revision: RevisionNumber,
        keys: Vec<String>,
    },

    /// The write touches attributes that are frozen.
    #[error("frozen attributes on {id}: {keys:?}")]
    FrozenAttributes { id: SessionId, keys: Vec<String> },

    #[error("revision {requested} of {id} is from the future (current {current})")]
    FutureRevision {
        id: SessionId,
        requested: RevisionNumber,
        current: RevisionNumber,
    },

    #[error("invalid namespace {0:?}")]
    InvalidNamespace(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out")]
    Timeout,

    #[error("lock poisoned")]
    Poisoned,
}

impl SessionError {
    /// True for errors that succeed when retried on a freshly refreshed revision.
    pub fn should_retry(&self) -> bool {
        matches!(self, Self::StaleUpdate { .. } | Self::StaleFetch { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
