//! Everything the `pg_wicket` binary needs on top of the library.

pub mod args;
pub mod config;
pub mod demo;
pub mod logger;
pub mod server;
pub mod tls;

pub use config::init_config;
pub use demo::demo_handler;
pub use logger::init_logging;
pub use server::run_server;

pub use args::{parse, Args, LogFormat};
