pub mod app;
pub mod auth;
mod client;
pub mod config;
pub mod errors;
pub mod listener;
pub mod messages;
pub mod query;
pub mod session;
pub mod stats;
pub mod utils;

pub use listener::{Server, ServerBuilder};
pub use query::{
    handler_fn, Column, PreparedStatement, QueryContext, QueryError, QueryHandler, RowWriter,
};
pub use session::{BackendKey, BackendKeyGenerator, SessionRegistry};
