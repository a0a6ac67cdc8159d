use std::fmt;

use crate::query::SessionContext;

/// The process id / secret key pair sent to the client in BackendKeyData.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendKey {
    pub process_id: i32,
    pub secret_key: i32,
}

impl BackendKey {
    pub fn new(process_id: i32, secret_key: i32) -> BackendKey {
        BackendKey {
            process_id,
            secret_key,
        }
    }
}

// The secret is the only credential a canceller needs, keep it out of logs.
impl fmt::Debug for BackendKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendKey")
            .field("process_id", &self.process_id)
            .field("secret_key", &"<hidden>")
            .finish()
    }
}

/// Allocates backend keys for new sessions.
///
/// Contract: secrets must be unpredictable to third parties. Process ids
/// should be unique among live sessions, but this is not trusted: the
/// registry rejects a duplicate and startup asks the generator again.
pub trait BackendKeyGenerator: Send + Sync + 'static {
    fn generate(&self, session: &SessionContext) -> BackendKey;
}

impl<F> BackendKeyGenerator for F
where
    F: Fn(&SessionContext) -> BackendKey + Send + Sync + 'static,
{
    fn generate(&self, session: &SessionContext) -> BackendKey {
        self(session)
    }
}

/// Default generator: random non-negative process id and random secret.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomKeyGenerator;

impl BackendKeyGenerator for RandomKeyGenerator {
    fn generate(&self, _session: &SessionContext) -> BackendKey {
        // Clients print the pid; keep it positive like a real backend.
        let process_id = rand::random::<i32>() & i32::MAX;
        let secret_key: i32 = rand::random();
        BackendKey::new(process_id, secret_key)
    }
}
