use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use super::QueryError;

#[derive(Debug)]
struct SessionInfo {
    remote_addr: SocketAddr,
    tls: bool,
    parameters: HashMap<String, String>,
}

/// What is known about a connection once its startup packet was read.
#[derive(Debug, Clone)]
pub struct SessionContext {
    inner: Arc<SessionInfo>,
}

impl SessionContext {
    pub fn new(
        remote_addr: SocketAddr,
        tls: bool,
        parameters: HashMap<String, String>,
    ) -> SessionContext {
        SessionContext {
            inner: Arc::new(SessionInfo {
                remote_addr,
                tls,
                parameters,
            }),
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    pub fn is_tls(&self) -> bool {
        self.inner.tls
    }

    /// A startup parameter sent by the client, e.g. `user` or `database`.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.inner.parameters.get(name).map(String::as_str)
    }

    pub fn user(&self) -> &str {
        self.parameter("user").unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> SessionContext {
        let parameters = HashMap::from([("user".to_string(), "test".to_string())]);
        SessionContext::new("127.0.0.1:5432".parse().unwrap(), false, parameters)
    }
}

/// Execution context of one query.
///
/// Carries the owning session's process id, so the cancel handle is bound
/// by identity rather than by address, and the query's cancellation token.
/// Cancellation is cooperative: handlers must poll [`QueryContext::cancelled`]
/// (or use [`QueryContext::until_cancelled`]) at every blocking step, a
/// handler that never looks will run to completion.
#[derive(Debug, Clone)]
pub struct QueryContext {
    session: SessionContext,
    process_id: i32,
    query_id: u64,
    token: CancellationToken,
}

impl QueryContext {
    pub(crate) fn new(
        session: SessionContext,
        process_id: i32,
        query_id: u64,
        token: CancellationToken,
    ) -> QueryContext {
        QueryContext {
            session,
            process_id,
            query_id,
            token,
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.session.remote_addr()
    }

    pub fn process_id(&self) -> i32 {
        self.process_id
    }

    pub fn query_id(&self) -> u64 {
        self.query_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the query is cancelled, by a cancel request, by server
    /// shutdown or because the connection went away.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Run `fut` unless the query is cancelled first.
    pub async fn until_cancelled<F>(&self, fut: F) -> Result<F::Output, QueryError>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(QueryError::canceled()),
            output = fut => Ok(output),
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Address of the client that issued the query.
pub fn remote_address(ctx: &QueryContext) -> SocketAddr {
    ctx.remote_addr()
}
