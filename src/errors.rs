//! Errors.

use std::io;

use crate::session::RegistryError;

/// Connection-level errors. Any of these ends the connection that produced
/// it; none of them affects other connections.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("socket error ocurred: {0}")]
    SocketError(String),
    #[error("bad client startup message")]
    ClientBadStartup,
    #[error("unexpected startup code {0}")]
    UnexpectedStartupCode(i32),
    #[error("protocol synchronization error: {0}")]
    ProtocolSyncError(String),
    #[error("TLS negotiation failed")]
    TlsError,
    #[error("authentication failed: {0}")]
    AuthError(String),
    #[error("bad config: {0}")]
    BadConfig(String),
    #[error("could not allocate a unique backend key after {attempts} attempts")]
    BackendKeyAllocation { attempts: usize },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// True when the peer simply went away; such connections are closed
    /// quietly.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
