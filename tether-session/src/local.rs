//! LocalSessions - the sessions this peer owns

use crate::state::State;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tether_model::{PeerId, SessionError, SessionId};

type Registry = Arc<RwLock<HashMap<u64, Arc<State>>>>;

/// Registry of locally owned sessions, keyed by sequence number.
///
/// A session leaves the map as soon as it closes, however it was closed.
pub struct LocalSessions {
    peer: PeerId,
    next_seq: AtomicU64,
    sessions: Registry,
}

impl LocalSessions {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            next_seq: AtomicU64::new(1),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Allocate the next session id and register a fresh state for it.
    pub fn create(&self) -> Result<Arc<State>, SessionError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::downgrade(&self.sessions);
        let state = Arc::new(State::with_close_hook(SessionId::new(self.peer, seq), move |id| {
            let Some(sessions) = registry.upgrade() else { return };
            if let Ok(mut sessions) = sessions.write() {
                sessions.remove(&id.seq);
            };
        }));
        self.sessions
            .write()
            .map_err(|_| SessionError::Poisoned)?
            .insert(seq, state.clone());
        tracing::debug!(session = %state.id(), "Session created");
        Ok(state)
    }

    /// The open state for `id`, or `NotFound`.
    pub fn get(&self, id: &SessionId) -> Result<Arc<State>, SessionError> {
        if !id.is_owned_by(&self.peer) {
            return Err(SessionError::NotFound(*id));
        }
        let state = self
            .sessions
            .read()
            .map_err(|_| SessionError::Poisoned)?
            .get(&id.seq)
            .cloned()
            .ok_or(SessionError::NotFound(*id))?;
        if state.is_closed() {
            return Err(SessionError::NotFound(*id));
        }
        Ok(state)
    }

    /// Close and forget every session. Returns how many were still open.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<State>> = match self.sessions.write() {
            Ok(mut sessions) => sessions.drain().map(|(_, s)| s).collect(),
            Err(_) => return 0,
        };
        drained.iter().filter(|s| s.close()).count()
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().map(|sessions| sessions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
