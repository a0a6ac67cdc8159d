//! The pluggable query execution API and the pipeline that drives it.

mod context;
mod error;
pub(crate) mod pipeline;
mod statement;
mod writer;

pub use context::{remote_address, QueryContext, SessionContext};
pub use error::QueryError;
pub use statement::{
    handler_fn, Column, Columns, HandlerFn, Parameter, PreparedStatement, QueryHandler,
    StatementHandler,
};
pub use writer::RowWriter;
