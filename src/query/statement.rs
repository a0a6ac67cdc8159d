use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;

use super::{QueryContext, QueryError, RowWriter};
use crate::messages::{FormatCode, Oid};

/// Column descriptor, forwarded to the client unchanged in RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub table_oid: Oid,
    pub attribute_number: i16,
    pub oid: Oid,
    pub width: i16,
    pub type_modifier: i32,
}

impl Column {
    pub fn new(name: impl Into<String>, oid: Oid, width: i16) -> Column {
        Column {
            name: name.into(),
            table_oid: 0,
            attribute_number: 0,
            oid,
            width,
            type_modifier: -1,
        }
    }
}

pub type Columns = Vec<Column>;

/// A bound parameter as sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    format: FormatCode,
    oid: Oid,
    value: Option<Bytes>,
}

impl Parameter {
    pub(crate) fn new(format: FormatCode, oid: Oid, value: Option<Bytes>) -> Parameter {
        Parameter { format, oid, value }
    }

    pub fn format(&self) -> FormatCode {
        self.format
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// The value as text, if it was sent in text format and is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self.format {
            FormatCode::Text => self
                .value
                .as_deref()
                .and_then(|v| std::str::from_utf8(v).ok()),
            FormatCode::Binary => None,
        }
    }
}

/// Produces the rows of a prepared statement.
pub trait StatementHandler: Send + Sync + 'static {
    fn execute(
        &self,
        ctx: QueryContext,
        writer: RowWriter,
        parameters: Vec<Parameter>,
    ) -> BoxFuture<'static, Result<(), QueryError>>;
}

impl<F, Fut> StatementHandler for F
where
    F: Fn(QueryContext, RowWriter, Vec<Parameter>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), QueryError>> + Send + 'static,
{
    fn execute(
        &self,
        ctx: QueryContext,
        writer: RowWriter,
        parameters: Vec<Parameter>,
    ) -> BoxFuture<'static, Result<(), QueryError>> {
        Box::pin(self(ctx, writer, parameters))
    }
}

/// Output of [`QueryHandler::prepare`]: result columns, parameter types and
/// the handler producing rows. Executable any number of times.
#[derive(Clone)]
pub struct PreparedStatement {
    columns: Arc<Columns>,
    parameters: Vec<Oid>,
    handler: Arc<dyn StatementHandler>,
}

impl PreparedStatement {
    pub fn new<F, Fut>(handler: F) -> PreparedStatement
    where
        F: Fn(QueryContext, RowWriter, Vec<Parameter>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), QueryError>> + Send + 'static,
    {
        PreparedStatement::from_handler(handler)
    }

    pub fn from_handler(handler: impl StatementHandler) -> PreparedStatement {
        PreparedStatement {
            columns: Arc::new(Vec::new()),
            parameters: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    pub fn with_columns(mut self, columns: Columns) -> PreparedStatement {
        self.columns = Arc::new(columns);
        self
    }

    pub fn with_parameters(mut self, parameters: Vec<Oid>) -> PreparedStatement {
        self.parameters = parameters;
        self
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn parameters(&self) -> &[Oid] {
        &self.parameters
    }

    pub(crate) fn handler(&self) -> &Arc<dyn StatementHandler> {
        &self.handler
    }
}

impl fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("columns", &self.columns)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// Turns query text into a prepared statement. Called for every simple
/// query and every Parse message.
pub trait QueryHandler: Send + Sync + 'static {
    fn prepare(
        &self,
        ctx: QueryContext,
        query: String,
    ) -> BoxFuture<'static, Result<PreparedStatement, QueryError>>;
}

/// Wraps a closure as a [`QueryHandler`]. See [`handler_fn`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Build a [`QueryHandler`] from an async closure.
///
/// ```ignore
/// let handler = handler_fn(|_ctx, query| async move {
///     Ok(PreparedStatement::new(|_ctx, mut writer, _params| async move {
///         writer.complete("OK").await
///     }))
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(QueryContext, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<PreparedStatement, QueryError>> + Send + 'static,
{
    HandlerFn { f }
}

impl<F, Fut> QueryHandler for HandlerFn<F>
where
    F: Fn(QueryContext, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<PreparedStatement, QueryError>> + Send + 'static,
{
    fn prepare(
        &self,
        ctx: QueryContext,
        query: String,
    ) -> BoxFuture<'static, Result<PreparedStatement, QueryError>> {
        Box::pin((self.f)(ctx, query))
    }
}

impl<H: QueryHandler> QueryHandler for Arc<H> {
    fn prepare(
        &self,
        ctx: QueryContext,
        query: String,
    ) -> BoxFuture<'static, Result<PreparedStatement, QueryError>> {
        (**self).prepare(ctx, query)
    }
}
