use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::SessionError;
use crate::host::{SessionHost, SessionId};
use crate::session::{ExitPolicy, Session, SessionOptions};

/// Owns every live [`Session`], keyed by its host identifier.
///
/// This is the only path through which the pane tree acquires or releases a
/// session. The tree holds plain identifiers, so disposal is centralized
/// here and releasing an unknown id is harmless.
pub struct SessionRegistry<H: SessionHost> {
    host: Arc<H>,
    policy: ExitPolicy,
    sessions: Mutex<HashMap<SessionId, Arc<Session<H>>>>,
}

impl<H: SessionHost> SessionRegistry<H> {
    /// Create an empty registry backed by `host`.
    pub fn new(host: Arc<H>) -> Self {
        Self::with_exit_policy(host, ExitPolicy::default())
    }

    pub fn with_exit_policy(host: Arc<H>, policy: ExitPolicy) -> Self {
        Self {
            host,
            policy,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// Create a new session on the host and register it.
    pub async fn create_session(
        &self,
        options: SessionOptions,
    ) -> Result<Arc<Session<H>>, SessionError> {
        let session =
            Session::create(Arc::clone(&self.host), options, self.policy.clone()).await?;

        let stale = self
            .sessions()
            .insert(session.id(), Arc::clone(&session));
        if let Some(stale) = stale {
            // The host reused an identifier we never released.
            log::warn!("Session {} replaced a stale registry entry", stale.id());
            stale.dispose();
        }

        Ok(session)
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session<H>>> {
        self.sessions().get(&id).cloned()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions().contains_key(&id)
    }

    /// Dispose a session and forget it. Unknown ids are ignored.
    pub fn remove(&self, id: SessionId) {
        let removed = self.sessions().remove(&id);
        if let Some(session) = removed {
            session.dispose();
        }
    }

    /// All registered session ids, sorted.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<Session<H>>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
