//! Server-wide counters.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Counters shared by every connection task. Relaxed atomics: they are
/// observed for reporting only and never used for synchronization.
#[derive(Debug, Default)]
pub struct ServerStats {
    total_connections: AtomicU64,
    plain_connections: AtomicU64,
    tls_connections: AtomicU64,
    cancel_connections: AtomicU64,
    current_connections: AtomicI64,
    cancel_requests_applied: AtomicU64,
    cancel_requests_ignored: AtomicU64,
    queries_executed: AtomicU64,
    queries_canceled: AtomicU64,
    queries_failed: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_connections: u64,
    pub plain_connections: u64,
    pub tls_connections: u64,
    pub cancel_connections: u64,
    pub current_connections: i64,
    pub cancel_requests_applied: u64,
    pub cancel_requests_ignored: u64,
    pub queries_executed: u64,
    pub queries_canceled: u64,
    pub queries_failed: u64,
}

impl ServerStats {
    pub fn new() -> ServerStats {
        ServerStats::default()
    }

    /// Count an accepted socket. The returned guard keeps it in
    /// `current_connections` until dropped.
    pub fn connection_opened(self: &Arc<Self>) -> ConnectionGuard {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.current_connections.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            stats: Arc::clone(self),
        }
    }

    pub fn plain_connection(&self) {
        self.plain_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tls_connection(&self) {
        self.tls_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cancel_connection(&self) {
        self.cancel_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cancel_request(&self, applied: bool) {
        if applied {
            self.cancel_requests_applied.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cancel_requests_ignored.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn query_executed(&self) {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn query_canceled(&self) {
        self.queries_canceled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn query_failed(&self) {
        self.queries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn current_connections(&self) -> i64 {
        self.current_connections.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            plain_connections: self.plain_connections.load(Ordering::Relaxed),
            tls_connections: self.tls_connections.load(Ordering::Relaxed),
            cancel_connections: self.cancel_connections.load(Ordering::Relaxed),
            current_connections: self.current_connections.load(Ordering::Relaxed),
            cancel_requests_applied: self.cancel_requests_applied.load(Ordering::Relaxed),
            cancel_requests_ignored: self.cancel_requests_ignored.load(Ordering::Relaxed),
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            queries_canceled: self.queries_canceled.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connections: {} total ({} plain, {} tls, {} cancel), {} open; \
             cancel requests: {} applied, {} ignored; \
             queries: {} executed, {} canceled, {} failed",
            self.total_connections,
            self.plain_connections,
            self.tls_connections,
            self.cancel_connections,
            self.current_connections,
            self.cancel_requests_applied,
            self.cancel_requests_ignored,
            self.queries_executed,
            self.queries_canceled,
            self.queries_failed,
        )
    }
}

#[derive(Debug)]
pub struct ConnectionGuard {
    stats: Arc<ServerStats>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.stats
            .current_connections
            .fetch_sub(1, Ordering::Relaxed);
    }
}
