use bytes::BytesMut;
use log::{debug, error, info, warn};
use std::sync::Arc;

use crate::errors::Error;
use crate::messages::constants::*;
use crate::messages::{
    empty_query_response, error_message, read_message, ready_for_query, row_description,
    BytesMutReader,
};
use crate::query::pipeline::{self, Outcome};

use super::core::Client;

impl<S, T> Client<S, T>
where
    S: tokio::io::AsyncRead + std::marker::Unpin,
    T: tokio::io::AsyncWrite + std::marker::Unpin,
{
    /// Handle a connected and authenticated client until it disconnects or
    /// the server shuts down.
    pub async fn handle(&mut self) -> Result<(), Error> {
        loop {
            let message = tokio::select! {
                biased;
                _ = self.base_token.cancelled() => None,
                message = read_message(&mut self.read) => Some(message),
            };

            let (code, message) = match message {
                Some(Ok(message)) => message,
                Some(Err(err)) if err.is_disconnect() => {
                    self.log_disconnect();
                    return Ok(());
                }
                Some(Err(err)) => {
                    warn!("Client {:?}: {err}", self.addr);
                    let _ = self.terminate(&err.to_string(), sqlstate::PROTOCOL_VIOLATION).await;
                    return Err(err);
                }
                None => {
                    info!(
                        "Closing session {} of {:?} for shutdown",
                        self.process_id(),
                        self.addr
                    );
                    let _ = self
                        .terminate(
                            "terminating connection due to administrator command",
                            sqlstate::ADMIN_SHUTDOWN,
                        )
                        .await;
                    return Err(Error::ShuttingDown);
                }
            };

            // Discard messages until the client resynchronizes.
            if self.skip_until_sync && code != SYNC && code != TERMINATE {
                debug!("Skipping '{}' until Sync", code as char);
                continue;
            }

            match code {
                QUERY => self.simple_query(message).await?,
                PARSE => self.parse(message).await?,
                BIND => self.bind(message),
                DESCRIBE => self.describe(message),
                EXECUTE => self.execute(message).await?,
                CLOSE => self.close(message),
                SYNC => self.sync().await?,
                FLUSH => self.flush().await?,
                TERMINATE => {
                    self.log_disconnect();
                    return Ok(());
                }
                _ => {
                    let message = format!("invalid frontend message type {}", code as char);
                    error!("Client {:?}: {message}", self.addr);
                    self.terminate(&message, sqlstate::PROTOCOL_VIOLATION).await?;
                    return Err(Error::ProtocolSyncError(message));
                }
            }
        }
    }

    /// Simple query cycle: one query, rows in text format, ReadyForQuery.
    async fn simple_query(&mut self, mut message: BytesMut) -> Result<(), Error> {
        let query = match message.read_string() {
            Ok(query) => query,
            Err(err) => {
                self.terminate("invalid Query message", sqlstate::PROTOCOL_VIOLATION)
                    .await?;
                return Err(err);
            }
        };

        if query.trim().is_empty() {
            self.send(empty_query_response());
            self.send(ready_for_query(false));
            return self.flush().await;
        }

        debug!("Session {} query: {query}", self.process_id());

        let handler = Arc::clone(&self.state.handler);
        let (ctx, registration) = self.begin_query();
        let outcome = match pipeline::prepare(handler.as_ref(), &ctx, query).await {
            Ok(statement) => {
                if !statement.columns().is_empty() {
                    self.send(row_description(statement.columns(), &[]));
                    self.flush().await?;
                }
                self.run_statement(ctx, &statement, Vec::new(), &[])
                    .await?
            }
            Err(err) if err.is_canceled() => Outcome::Canceled,
            Err(err) => Outcome::Failed(err),
        };
        drop(registration);

        self.report(outcome);
        self.send(ready_for_query(false));
        self.flush().await
    }

    /// Flush whatever is queued, then send a FATAL error.
    pub(crate) async fn terminate(&mut self, message: &str, code: &str) -> Result<(), Error> {
        self.send(error_message(message, code));
        self.flush().await
    }

    fn log_disconnect(&self) {
        debug!(
            "Client {:?} closed session {}",
            self.addr,
            self.process_id()
        );
    }
}
