/// Handle clients by pretending to be a PostgreSQL server.
use ahash::AHashMap;
use bytes::{BufMut, BytesMut};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

use crate::errors::Error;
use crate::listener::ServerState;
use crate::messages::{command_complete, sqlstate, write_all_flush, FormatCode, Oid};
use crate::query::pipeline::{self, Outcome};
use crate::query::{Parameter, PreparedStatement, QueryContext, QueryError, SessionContext};
use crate::session::{BackendKey, CancelHandle, CancelRegistration, SessionGuard};

/// A statement created by Parse.
#[derive(Debug, Clone)]
pub(crate) struct StoredStatement {
    pub(crate) statement: PreparedStatement,
    /// Declared by the handler, or taken from the Parse message when the
    /// handler declared none.
    pub(crate) parameter_types: Vec<Oid>,
}

/// A statement with bound parameters, created by Bind.
#[derive(Debug, Clone)]
pub(crate) struct Portal {
    pub(crate) statement: PreparedStatement,
    pub(crate) parameters: Vec<Parameter>,
    pub(crate) result_formats: Vec<FormatCode>,
}

/// The client state. One of these is created per client.
pub(crate) struct Client<S, T> {
    /// The reads are buffered (8K by default).
    pub(crate) read: BufReader<S>,

    /// We buffer the writes ourselves because we know the protocol
    /// better than a stock buffer.
    pub(crate) write: T,

    /// Internal buffer, where we place messages until we have to flush
    /// them to the client.
    pub(crate) buffer: BytesMut,

    /// Address
    pub(crate) addr: std::net::SocketAddr,

    /// Issued at startup; the pair a cancel request must present.
    pub(crate) key: BackendKey,

    pub(crate) session: SessionContext,

    /// Keeps the session registered while the client lives.
    pub(crate) session_guard: SessionGuard,

    pub(crate) state: Arc<ServerState>,

    /// Parent of every query token of this connection. A child of the server
    /// shutdown token.
    pub(crate) base_token: CancellationToken,

    /// Last query id handed out.
    pub(crate) query_seq: u64,

    pub(crate) statements: AHashMap<String, StoredStatement>,
    pub(crate) portals: AHashMap<String, Portal>,

    /// Set after an error in the extended protocol: everything up to the
    /// next Sync is discarded.
    pub(crate) skip_until_sync: bool,
}

impl<S, T> Client<S, T>
where
    S: tokio::io::AsyncRead + std::marker::Unpin,
    T: tokio::io::AsyncWrite + std::marker::Unpin,
{
    pub fn process_id(&self) -> i32 {
        self.key.process_id
    }

    /// Start a query: derive its token and publish the cancel handle. The
    /// handle stays published until the registration is dropped.
    pub(crate) fn begin_query(&mut self) -> (QueryContext, CancelRegistration) {
        self.query_seq += 1;
        let token = self.base_token.child_token();
        let registration = self
            .session_guard
            .publish(CancelHandle::new(self.query_seq, token.clone()));
        let ctx = QueryContext::new(
            self.session.clone(),
            self.key.process_id,
            self.query_seq,
            token,
        );
        (ctx, registration)
    }

    /// Run a prepared statement, streaming its rows to the client.
    pub(crate) async fn run_statement(
        &mut self,
        ctx: QueryContext,
        statement: &PreparedStatement,
        parameters: Vec<Parameter>,
        formats: &[FormatCode],
    ) -> Result<Outcome, Error> {
        pipeline::execute(
            &mut self.write,
            &mut self.buffer,
            ctx,
            statement,
            parameters,
            formats,
            self.state.general.row_channel_capacity,
        )
        .await
    }

    /// Queue CommandComplete or ErrorResponse for an execution. Returns
    /// whether the execution succeeded.
    pub(crate) fn report(&mut self, outcome: Outcome) -> bool {
        match outcome {
            Outcome::Complete(tag) => {
                self.state.stats.query_executed();
                self.send(command_complete(&tag));
                true
            }
            Outcome::Canceled => {
                self.state.stats.query_canceled();
                // Cancelled by server shutdown rather than by a CancelRequest.
                let err = if self.state.shutdown.is_cancelled() {
                    QueryError::new(
                        sqlstate::ADMIN_SHUTDOWN,
                        "terminating connection due to administrator command",
                    )
                } else {
                    QueryError::canceled()
                };
                self.send(err.to_pg_error().to_bytes());
                false
            }
            Outcome::Failed(err) => {
                self.state.stats.query_failed();
                self.send(err.to_pg_error().to_bytes());
                false
            }
        }
    }

    /// Queue a message.
    pub(crate) fn send(&mut self, message: BytesMut) {
        self.buffer.put(message);
    }

    /// Write out everything queued.
    pub(crate) async fn flush(&mut self) -> Result<(), Error> {
        if !self.buffer.is_empty() {
            write_all_flush(&mut self.write, &self.buffer).await?;
            self.buffer.clear();
        }
        Ok(())
    }
}

impl<S, T> Drop for Client<S, T> {
    fn drop(&mut self) {
        // Detached statement handlers still running for this connection
        // must stop; nobody will read their rows.
        self.base_token.cancel();
    }
}
