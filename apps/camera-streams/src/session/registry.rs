use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use super::{Session, SessionKey};
use crate::status::StatusPublisher;
use crate::{Result, StreamManagerError};

/// Source of truth for which sessions exist. At most one session per key.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionKey, Arc<Session>>>,
    publisher: StatusPublisher,
}

impl SessionRegistry {
    pub fn new(publisher: StatusPublisher) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            publisher,
        }
    }

    /// Atomically creates and inserts a session for `key`, failing if one already exists.
    pub fn acquire(&self, key: SessionKey, output_path: PathBuf) -> Result<Arc<Session>> {
        let mut sessions = self.sessions.write();
        match sessions.entry(key) {
            Entry::Occupied(entry) => Err(StreamManagerError::AlreadyActive {
                camera_id: entry.key().camera_id.clone(),
                purpose: entry.key().purpose,
            }),
            Entry::Vacant(entry) => {
                let session = Arc::new(Session::new(
                    entry.key().clone(),
                    output_path,
                    self.publisher.clone(),
                ));
                debug!(session = %entry.key(), session_id = %session.id(), "Session registered");
                entry.insert(session.clone());
                Ok(session)
            }
        }
    }

    /// Removes whatever session is stored under `key`. Idempotent.
    pub fn release(&self, key: &SessionKey) -> bool {
        let removed = self.sessions.write().remove(key).is_some();
        if removed {
            debug!(session = %key, "Session released");
        }
        removed
    }

    /// Removes `session` only if it is still the one registered under its key, so a late
    /// exit of an old session can never evict its successor.
    pub fn release_session(&self, session: &Session) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get(session.key()) {
            Some(current) if current.id() == session.id() => {
                sessions.remove(session.key());
                debug!(session = %session.key(), session_id = %session.id(), "Session released");
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions.read().get(key).cloned()
    }

    /// Snapshot of every registered session, ordered by key.
    pub fn list_all(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        sessions.sort_by(|a, b| a.key().cmp(b.key()));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
