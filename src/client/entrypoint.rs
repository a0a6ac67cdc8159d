use bytes::{BufMut, BytesMut};
use log::{debug, error};
use std::sync::Arc;
use tokio::io::split;
use tokio::net::TcpStream;

use crate::config::TlsMode;
use crate::errors::Error;
use crate::listener::ServerState;
use crate::messages::config_socket::configure_tcp_socket_for_cancel;
use crate::messages::{error_response_terminal, sqlstate, write_all};

use super::cancel::handle_cancel;
use super::core::Client;
use super::startup::{get_startup, startup_tls, unless_shutdown, ClientConnectionType};

/// Answer a single-byte response to SSLRequest or GSSENCRequest.
async fn answer(stream: &mut TcpStream, byte: u8) -> Result<(), Error> {
    let mut response = BytesMut::with_capacity(1);
    response.put_u8(byte);
    write_all(stream, response).await
}

pub(crate) async fn client_entrypoint_too_many_clients_already(
    mut stream: TcpStream,
    state: &ServerState,
) -> Result<(), Error> {
    let addr = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(err) => {
            return Err(Error::SocketError(format!(
                "Failed to get peer address: {err:?}"
            )));
        }
    };

    let mut encryption_rejected = false;
    loop {
        match unless_shutdown(state, get_startup::<TcpStream>(&mut stream)).await? {
            (ClientConnectionType::Tls, _) | (ClientConnectionType::GssEnc, _)
                if !encryption_rejected =>
            {
                // No encrypted session for a client we are about to reject.
                answer(&mut stream, b'N').await?;
                encryption_rejected = true;
            }
            (ClientConnectionType::Startup, _) => break,
            (ClientConnectionType::CancelQuery, bytes) => {
                // Cancel requests keep working at the connection limit.
                state.stats.cancel_connection();
                configure_tcp_socket_for_cancel(&stream);
                return handle_cancel(stream, bytes, addr, state).await;
            }
            (_, _) => {
                return Err(Error::ProtocolSyncError(
                    "Bad postgres client (too many clients)".into(),
                ))
            }
        }
    }
    error_response_terminal(
        &mut stream,
        "sorry, too many clients already",
        sqlstate::TOO_MANY_CONNECTIONS,
    )
    .await?;
    Ok(())
}

/// Client entrypoint.
pub(crate) async fn client_entrypoint(
    mut stream: TcpStream,
    state: Arc<ServerState>,
) -> Result<(), Error> {
    // Figure out if the client wants TLS or not.
    let addr = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(err) => {
            return Err(Error::SocketError(format!(
                "Failed to get peer address: {err:?}"
            )));
        }
    };

    let mut ssl_rejected = false;
    let mut gss_rejected = false;

    loop {
        match unless_shutdown(&state, get_startup::<TcpStream>(&mut stream)).await {
            // Client requested a TLS connection.
            Ok((ClientConnectionType::Tls, _)) if !ssl_rejected => {
                // TLS settings are configured, will setup TLS now.
                if let Some(tls_acceptor) = state.tls_acceptor.clone() {
                    answer(&mut stream, b'S').await?;

                    // Negotiate TLS.
                    return match startup_tls(stream, addr, Arc::clone(&state), tls_acceptor)
                        .await?
                    {
                        Some(mut client) => client.handle().await,
                        // It was a cancel request.
                        None => Ok(()),
                    };
                }

                // TLS is not configured, we cannot offer it.
                // Attempting regular startup. Client can disconnect now
                // if they choose.
                answer(&mut stream, b'N').await?;
                ssl_rejected = true;
            }

            Ok((ClientConnectionType::GssEnc, _)) if !gss_rejected => {
                // GSSAPI encryption is never offered.
                answer(&mut stream, b'N').await?;
                gss_rejected = true;
            }

            // Client wants to use plain connection without encryption.
            Ok((ClientConnectionType::Startup, bytes)) => {
                if state.general.tls_mode == TlsMode::Require {
                    error_response_terminal(
                        &mut stream,
                        "Connection without SSL is not allowed by tls_mode.",
                        sqlstate::INVALID_AUTHORIZATION_SPECIFICATION,
                    )
                    .await?;
                    return Err(Error::ProtocolSyncError("ssl is required".to_string()));
                }
                state.stats.plain_connection();
                let (read, write) = split(stream);

                // Continue with regular startup.
                let mut client =
                    Client::startup(read, write, addr, bytes, Arc::clone(&state), false).await?;
                return client.handle().await;
            }

            // Client wants to cancel a query.
            Ok((ClientConnectionType::CancelQuery, bytes)) => {
                state.stats.cancel_connection();
                configure_tcp_socket_for_cancel(&stream);
                return handle_cancel(stream, bytes, addr, &state).await;
            }

            // A second negotiation request after we already answered one of
            // the same kind.
            Ok((ClientConnectionType::Tls, _)) | Ok((ClientConnectionType::GssEnc, _)) => {
                return Err(Error::ProtocolSyncError(
                    "Bad postgres client (plain)".into(),
                ));
            }

            Err(Error::ShuttingDown) => {
                debug!("Client {addr:?} dropped before startup for shutdown");
                return Err(Error::ShuttingDown);
            }

            // A client that hangs up after reading our 'N' is not an error.
            Err(Error::ClientBadStartup) if ssl_rejected || gss_rejected => {
                debug!("Client {addr:?} disconnected after encryption was refused");
                return Ok(());
            }

            // Something failed, probably the socket.
            Err(err) => {
                error!("{err:?}");
                return Err(err);
            }
        }
    }
}
