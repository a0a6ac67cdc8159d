use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use super::{CancelHandle, Session};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("process id {0} is already registered")]
    DuplicateProcessId(i32),
}

/// What a cancel request did. Never reported to the canceller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    UnknownProcessId,
    SecretMismatch,
    NoQueryInFlight,
}

/// Live sessions keyed by process id.
///
/// The only state shared between connection tasks. Sessions go in whole and
/// come out as clones, so readers never observe a half-built entry.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<i32, Session>>,
}

impl SessionRegistry {
    pub fn new() -> SessionRegistry {
        SessionRegistry::default()
    }

    /// Insert a session. A live session with the same process id is never
    /// replaced.
    pub fn put(&self, session: Session) -> Result<(), RegistryError> {
        let mut guard = self.sessions.write();
        match guard.entry(session.process_id) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateProcessId(session.process_id)),
            Entry::Vacant(entry) => {
                entry.insert(session);
                Ok(())
            }
        }
    }

    /// Insert a session and tie its lifetime to the returned guard.
    pub fn register(self: &Arc<Self>, session: Session) -> Result<SessionGuard, RegistryError> {
        let process_id = session.process_id;
        self.put(session)?;
        Ok(SessionGuard {
            registry: Arc::clone(self),
            process_id,
        })
    }

    pub fn get(&self, process_id: i32) -> Option<Session> {
        self.sessions.read().get(&process_id).cloned()
    }

    /// Publish the cancel handle of the query about to run. Returns false if
    /// the session is gone.
    pub fn update_cancel_handle(&self, process_id: i32, handle: CancelHandle) -> bool {
        match self.sessions.write().get_mut(&process_id) {
            Some(session) => {
                session.cancel = Some(handle);
                true
            }
            None => false,
        }
    }

    /// Drop the cancel handle of a finished query, unless a newer query
    /// already replaced it.
    pub fn clear_cancel_handle(&self, process_id: i32, query_id: u64) {
        let mut guard = self.sessions.write();
        if let Some(session) = guard.get_mut(&process_id) {
            if session
                .cancel
                .as_ref()
                .is_some_and(|handle| handle.query_id == query_id)
            {
                session.cancel = None;
            }
        }
    }

    pub fn delete(&self, process_id: i32) -> Option<Session> {
        self.sessions.write().remove(&process_id)
    }

    /// Validate a cancel request and fire the matching handle.
    pub fn cancel(&self, process_id: i32, secret_key: i32) -> CancelOutcome {
        // Copy the handle out so the token is cancelled without holding the lock.
        let handle = {
            let guard = self.sessions.read();
            let Some(session) = guard.get(&process_id) else {
                return CancelOutcome::UnknownProcessId;
            };
            if session.secret_key != secret_key {
                return CancelOutcome::SecretMismatch;
            }
            match &session.cancel {
                Some(handle) => handle.clone(),
                None => return CancelOutcome::NoQueryInFlight,
            }
        };
        handle.cancel();
        CancelOutcome::Cancelled
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

/// Removes its session from the registry when dropped, whatever way the
/// connection ended.
#[derive(Debug)]
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    process_id: i32,
}

impl SessionGuard {
    pub fn process_id(&self) -> i32 {
        self.process_id
    }

    /// Publish the cancel handle of a query. The handle is cleared again when
    /// the returned registration is dropped.
    pub fn publish(&self, handle: CancelHandle) -> CancelRegistration {
        let query_id = handle.query_id;
        self.registry.update_cancel_handle(self.process_id, handle);
        CancelRegistration {
            registry: Arc::clone(&self.registry),
            process_id: self.process_id,
            query_id,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.registry.delete(self.process_id).is_some() {
            debug!("Session {} deregistered", self.process_id);
        }
    }
}

/// Keeps a query's cancel handle published while alive.
#[derive(Debug)]
pub struct CancelRegistration {
    registry: Arc<SessionRegistry>,
    process_id: i32,
    query_id: u64,
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        self.registry
            .clear_cancel_handle(self.process_id, self.query_id);
    }
}
