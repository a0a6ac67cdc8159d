//! Runs statement handlers on their own task and streams their rows to the
//! client until they finish or the query is cancelled.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use futures::FutureExt;
use log::{debug, error};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

use super::writer::RowEvent;
use super::{Parameter, PreparedStatement, QueryContext, QueryError, QueryHandler, RowWriter};
use crate::errors::Error;
use crate::messages::{data_row, write_all_flush, FormatCode};

/// Pending rows are flushed once the buffer grows past this.
const FLUSH_THRESHOLD: usize = 8 * 1024;

/// How an execution ended.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Command tag to send in CommandComplete.
    Complete(String),
    Canceled,
    Failed(QueryError),
}

/// Ask the query handler for a prepared statement, giving up as soon as the
/// query is cancelled.
pub(crate) async fn prepare(
    handler: &dyn QueryHandler,
    ctx: &QueryContext,
    query: String,
) -> Result<PreparedStatement, QueryError> {
    // The call itself runs inside the guard too: a handler may panic before
    // it returns its future.
    let prepared =
        AssertUnwindSafe(async { handler.prepare(ctx.clone(), query).await }).catch_unwind();
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(QueryError::canceled()),
        result = prepared => match result {
            Ok(result) => result,
            Err(_) => {
                error!("Query handler panicked in session {}", ctx.process_id());
                Err(QueryError::internal("query handler panicked"))
            }
        },
    }
}

/// Execute a prepared statement, writing DataRow messages into `buffer` and
/// flushing to `write` as rows arrive.
///
/// On cancellation this returns at once without waiting for the handler: its
/// task keeps running detached and any further row it writes fails. Errors
/// are only returned for client I/O failures.
pub(crate) async fn execute<T>(
    write: &mut T,
    buffer: &mut BytesMut,
    ctx: QueryContext,
    statement: &PreparedStatement,
    parameters: Vec<Parameter>,
    formats: &[FormatCode],
    capacity: usize,
) -> Result<Outcome, Error>
where
    T: AsyncWrite + std::marker::Unpin,
{
    let token = ctx.token().clone();
    // However this function exits, a still-running handler must learn that
    // nobody reads its rows anymore.
    let _cancel_on_exit = token.clone().drop_guard();

    let (tx, mut rx) = mpsc::channel(capacity.max(1));
    let writer = RowWriter::new(tx, token.clone(), statement.columns().len());
    let process_id = ctx.process_id();
    let query_id = ctx.query_id();
    let handler = Arc::clone(statement.handler());
    let mut task =
        tokio::spawn(async move { handler.execute(ctx, writer, parameters).await });

    let mut tag = None;
    let mut rows: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Query {query_id} of session {process_id} cancelled after {rows} rows");
                return Ok(Outcome::Canceled);
            }
            event = rx.recv() => match event {
                Some(RowEvent::Row(values)) => {
                    buffer.put(data_row(&values, formats));
                    rows += 1;
                    if rx.is_empty() || buffer.len() >= FLUSH_THRESHOLD {
                        flush(write, buffer).await?;
                    }
                }
                Some(RowEvent::Complete(completed)) => tag = Some(completed),
                // The handler dropped its writer, normally by returning.
                None => break,
            }
        }
    }

    let joined = tokio::select! {
        biased;
        _ = token.cancelled() => return Ok(Outcome::Canceled),
        joined = &mut task => joined,
    };

    let outcome = match joined {
        Ok(Ok(())) => Outcome::Complete(tag.unwrap_or_else(|| format!("SELECT {rows}"))),
        Ok(Err(err)) if err.is_canceled() => Outcome::Canceled,
        Ok(Err(err)) => Outcome::Failed(err),
        Err(err) if err.is_panic() => {
            error!("Statement handler panicked in session {process_id}, query {query_id}");
            Outcome::Failed(QueryError::internal("statement handler panicked"))
        }
        Err(_) => Outcome::Canceled,
    };
    Ok(outcome)
}

async fn flush<T>(write: &mut T, buffer: &mut BytesMut) -> Result<(), Error>
where
    T: AsyncWrite + std::marker::Unpin,
{
    if buffer.is_empty() {
        return Ok(());
    }
    write_all_flush(write, buffer).await?;
    buffer.clear();
    Ok(())
}
