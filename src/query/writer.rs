use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::QueryError;
use crate::messages::Value;

#[derive(Debug)]
pub(crate) enum RowEvent {
    Row(Vec<Value>),
    Complete(String),
}

/// Sink for the rows of one execution.
///
/// Rows travel over a bounded channel to the connection task, which encodes
/// them. Once the query is cancelled every write fails with
/// [`QueryError::canceled`], which is how a handler that keeps producing rows
/// finds out it should stop.
#[derive(Debug)]
pub struct RowWriter {
    tx: mpsc::Sender<RowEvent>,
    token: CancellationToken,
    columns: usize,
    written: u64,
    completed: bool,
}

impl RowWriter {
    pub(crate) fn new(
        tx: mpsc::Sender<RowEvent>,
        token: CancellationToken,
        columns: usize,
    ) -> RowWriter {
        RowWriter {
            tx,
            token,
            columns,
            written: 0,
            completed: false,
        }
    }

    /// Send one row. The number of values must match the statement's columns.
    pub async fn row(&mut self, values: Vec<Value>) -> Result<(), QueryError> {
        if self.completed {
            return Err(QueryError::internal("row written after command completion"));
        }
        if values.len() != self.columns {
            return Err(QueryError::internal(format!(
                "row has {} values but the statement describes {} columns",
                values.len(),
                self.columns
            )));
        }
        self.send(RowEvent::Row(values)).await?;
        self.written += 1;
        Ok(())
    }

    /// Finish the execution with a command tag, sent to the client verbatim.
    /// Without it the tag is `SELECT <rows written>`.
    pub async fn complete(&mut self, tag: impl Into<String>) -> Result<(), QueryError> {
        if self.completed {
            return Err(QueryError::internal("command already completed"));
        }
        self.send(RowEvent::Complete(tag.into())).await?;
        self.completed = true;
        Ok(())
    }

    /// Rows written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    async fn send(&self, event: RowEvent) -> Result<(), QueryError> {
        if self.token.is_cancelled() {
            return Err(QueryError::canceled());
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(QueryError::canceled()),
            sent = self.tx.send(event) => sent.map_err(|_| QueryError::canceled()),
        }
    }
}
