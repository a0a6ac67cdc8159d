//! Backend sessions and the registry that makes them reachable from
//! cancel requests arriving on other connections.

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;

mod keys;
mod registry;

pub use keys::{BackendKey, BackendKeyGenerator, RandomKeyGenerator};
pub use registry::{
    CancelOutcome, CancelRegistration, RegistryError, SessionGuard, SessionRegistry,
};

/// Cancellation handle of the query currently running in a session.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    /// Per-session query sequence number. Used so a finishing query only
    /// clears its own handle.
    pub query_id: u64,
    pub token: CancellationToken,
}

impl CancelHandle {
    pub fn new(query_id: u64, token: CancellationToken) -> CancelHandle {
        CancelHandle { query_id, token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

/// A registered backend session.
#[derive(Debug, Clone)]
pub struct Session {
    pub process_id: i32,
    pub secret_key: i32,
    pub remote_addr: SocketAddr,

    /// Set only while a query is in flight.
    pub cancel: Option<CancelHandle>,
}

impl Session {
    pub fn new(key: BackendKey, remote_addr: SocketAddr) -> Session {
        Session {
            process_id: key.process_id,
            secret_key: key.secret_key,
            remote_addr,
            cancel: None,
        }
    }

    pub fn key(&self) -> BackendKey {
        BackendKey {
            process_id: self.process_id,
            secret_key: self.secret_key,
        }
    }
}
