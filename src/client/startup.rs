use ahash::AHashMap;
use bytes::{Buf, BufMut, BytesMut};
use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::io::{split, AsyncReadExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

use crate::auth::authenticate;
use crate::errors::Error;
use crate::listener::ServerState;
use crate::messages::constants::*;
use crate::messages::{
    auth_ok, backend_key_data, error_response_terminal, parse_startup, ready_for_query,
    server_parameter_message, write_all_flush,
};
use crate::query::SessionContext;
use crate::session::{BackendKey, RegistryError, Session, SessionGuard};

use super::cancel::handle_cancel;
use super::core::Client;

/// Generator calls allowed before giving up on finding an unused process id.
pub(crate) const MAX_KEY_ATTEMPTS: usize = 8;

/// Run a step that happens before the session exists, giving up once the
/// server starts shutting down. Sessions watch shutdown themselves.
pub(crate) async fn unless_shutdown<F, R>(state: &ServerState, step: F) -> Result<R, Error>
where
    F: Future<Output = Result<R, Error>>,
{
    tokio::select! {
        biased;
        _ = state.shutdown.cancelled() => Err(Error::ShuttingDown),
        result = step => result,
    }
}

/// Type of connection received from client.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ClientConnectionType {
    Startup,
    Tls,
    GssEnc,
    CancelQuery,
}

/// Handle the first message the client sends.
pub(crate) async fn get_startup<S>(
    stream: &mut S,
) -> Result<(ClientConnectionType, BytesMut), Error>
where
    S: tokio::io::AsyncRead + std::marker::Unpin,
{
    // Get startup message length.
    let len = match stream.read_i32().await {
        Ok(len) => len,
        Err(_) => return Err(Error::ClientBadStartup),
    };

    // Minimum is 8 bytes (4 for length field + 4 for protocol code).
    if !(8..=MAX_STARTUP_PACKET_LEN).contains(&len) {
        return Err(Error::ClientBadStartup);
    }

    // Get the rest of the message.
    let mut startup = vec![0u8; (len - 4) as usize];
    match stream.read_exact(&mut startup).await {
        Ok(_) => (),
        Err(_) => return Err(Error::ClientBadStartup),
    };

    let mut bytes = BytesMut::from(&startup[..]);
    let code = bytes.get_i32();

    match code {
        // Client is requesting SSL (TLS).
        SSL_REQUEST_CODE if len == 8 => Ok((ClientConnectionType::Tls, bytes)),

        REQUEST_GSSENCMODE_CODE if len == 8 => Ok((ClientConnectionType::GssEnc, bytes)),

        // Client wants to use plain text, requesting regular startup.
        PROTOCOL_VERSION_NUMBER => Ok((ClientConnectionType::Startup, bytes)),

        // Client is requesting to cancel a running query.
        CANCEL_REQUEST_CODE if len == CANCEL_REQUEST_LEN => {
            Ok((ClientConnectionType::CancelQuery, bytes))
        }

        SSL_REQUEST_CODE | REQUEST_GSSENCMODE_CODE | CANCEL_REQUEST_CODE => Err(
            Error::ProtocolSyncError(format!("Invalid length {len} for startup code {code}")),
        ),

        // Something else, probably something is wrong, and it's not our fault,
        // e.g. badly implemented Postgres client.
        _ => Err(Error::UnexpectedStartupCode(code)),
    }
}

/// Handle TLS connection negotiation. The `S` answer has already been sent.
pub(crate) async fn startup_tls(
    stream: TcpStream,
    addr: std::net::SocketAddr,
    state: Arc<ServerState>,
    tls_acceptor: tokio_native_tls::TlsAcceptor,
) -> Result<
    Option<
        Client<
            ReadHalf<tokio_native_tls::TlsStream<TcpStream>>,
            WriteHalf<tokio_native_tls::TlsStream<TcpStream>>,
        >,
    >,
    Error,
> {
    let accepted = tokio::select! {
        biased;
        _ = state.shutdown.cancelled() => return Err(Error::ShuttingDown),
        accepted = tls_acceptor.accept(stream) => accepted,
    };
    let mut stream = match accepted {
        Ok(stream) => stream,

        // TLS negotiation failed.
        Err(err) => {
            error!("TLS negotiation failed: {err:?}");
            return Err(Error::TlsError);
        }
    };

    // TLS negotiation successful.
    // Continue with regular startup using encrypted connection.
    match unless_shutdown(&state, get_startup(&mut stream)).await? {
        // Got good startup message, proceeding like normal except we
        // are encrypted now.
        (ClientConnectionType::Startup, bytes) => {
            state.stats.tls_connection();
            let (read, write) = split(stream);
            Client::startup(read, write, addr, bytes, state, true)
                .await
                .map(Some)
        }

        (ClientConnectionType::CancelQuery, bytes) => {
            state.stats.cancel_connection();
            handle_cancel(stream, bytes, addr, &state).await?;
            Ok(None)
        }

        (ClientConnectionType::Tls, _) | (ClientConnectionType::GssEnc, _) => {
            Err(Error::ProtocolSyncError("Bad postgres client (tls)".into()))
        }
    }
}

/// Register a session under a fresh backend key, asking the generator again
/// when it hands out a process id that is already in use.
pub(crate) fn allocate_session(
    state: &ServerState,
    session: &SessionContext,
) -> Result<(SessionGuard, BackendKey), Error> {
    for attempt in 1..=MAX_KEY_ATTEMPTS {
        let key = state.key_generator.generate(session);
        match state
            .registry
            .register(Session::new(key, session.remote_addr()))
        {
            Ok(guard) => return Ok((guard, key)),
            Err(RegistryError::DuplicateProcessId(process_id)) => {
                warn!(
                    "Backend key generator returned process id {process_id} which is in use (attempt {attempt}/{MAX_KEY_ATTEMPTS})"
                );
            }
        }
    }
    Err(Error::BackendKeyAllocation {
        attempts: MAX_KEY_ATTEMPTS,
    })
}

impl<S, T> Client<S, T>
where
    S: tokio::io::AsyncRead + std::marker::Unpin,
    T: tokio::io::AsyncWrite + std::marker::Unpin,
{
    /// Handle Postgres client startup after TLS negotiation is complete
    /// or over plain text.
    pub(crate) async fn startup(
        mut read: S,
        mut write: T,
        addr: std::net::SocketAddr,
        bytes: BytesMut, // The rest of the startup message.
        state: Arc<ServerState>,
        use_tls: bool,
    ) -> Result<Client<S, T>, Error> {
        let parameters = match parse_startup(bytes) {
            Ok(parameters) => parameters,
            Err(err) => {
                error_response_terminal(
                    &mut write,
                    "invalid startup packet layout: missing \"user\" parameter",
                    sqlstate::PROTOCOL_VIOLATION,
                )
                .await?;
                return Err(err);
            }
        };

        let session = SessionContext::new(addr, use_tls, parameters);
        let username = session.user().to_string();

        unless_shutdown(
            &state,
            authenticate(
                &mut read,
                &mut write,
                state.general.auth_method,
                state.credentials.as_ref(),
                &username,
            ),
        )
        .await?;

        let (session_guard, key) = match allocate_session(&state, &session) {
            Ok(allocated) => allocated,
            Err(err) => {
                error_response_terminal(
                    &mut write,
                    "sorry, could not allocate a backend key",
                    sqlstate::TOO_MANY_CONNECTIONS,
                )
                .await?;
                return Err(err);
            }
        };
        debug!(
            "Client {addr:?} registered as session {} (user {username})",
            key.process_id
        );

        let mut buf = BytesMut::new();
        buf.put(auth_ok());
        for (name, value) in [
            ("server_version", state.general.server_version.as_str()),
            ("server_encoding", "UTF8"),
            ("client_encoding", "UTF8"),
            ("DateStyle", "ISO, MDY"),
            ("integer_datetimes", "on"),
            ("standard_conforming_strings", "on"),
        ] {
            buf.put(server_parameter_message(name, value));
        }
        if let Some(application_name) = session.parameter("application_name") {
            buf.put(server_parameter_message("application_name", application_name));
        }
        buf.put(backend_key_data(&key));
        buf.put(ready_for_query(false));
        write_all_flush(&mut write, &buf).await?;

        if state.general.log_client_connections {
            info!(
                "Client {addr:?} connected ({}), user: {username}",
                if use_tls { "TLS" } else { "plain" }
            );
        }

        let base_token = state.shutdown.child_token();
        Ok(Client {
            read: BufReader::new(read),
            write,
            buffer: BytesMut::with_capacity(8196),
            addr,
            key,
            session,
            session_guard,
            state,
            base_token,
            query_seq: 0,
            statements: AHashMap::new(),
            portals: AHashMap::new(),
            skip_until_sync: false,
        })
    }
}
