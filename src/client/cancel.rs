use bytes::{Buf, BytesMut};
use log::debug;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::errors::Error;
use crate::listener::ServerState;
use crate::session::CancelOutcome;

/// Handle a CancelRequest. `bytes` is the packet body after the request code.
///
/// The canceller never gets an answer: the connection is closed whether or
/// not the key matched a running query.
pub(crate) async fn handle_cancel<S>(
    mut stream: S,
    mut bytes: BytesMut,
    addr: std::net::SocketAddr,
    state: &ServerState,
) -> Result<(), Error>
where
    S: AsyncWrite + std::marker::Unpin,
{
    if bytes.len() != 8 {
        return Err(Error::ProtocolSyncError(format!(
            "Invalid cancel request body length {}",
            bytes.len()
        )));
    }
    let process_id = bytes.get_i32();
    let secret_key = bytes.get_i32();

    let outcome = state.registry.cancel(process_id, secret_key);
    state
        .stats
        .cancel_request(outcome == CancelOutcome::Cancelled);
    match outcome {
        CancelOutcome::Cancelled => {
            debug!("Client {addr:?} cancelled the running query of session {process_id}");
        }
        CancelOutcome::UnknownProcessId => {
            debug!("Cancel request from {addr:?} for unknown session {process_id}");
        }
        CancelOutcome::SecretMismatch => {
            debug!("Cancel request from {addr:?} for session {process_id} with a wrong secret key");
        }
        CancelOutcome::NoQueryInFlight => {
            debug!("Cancel request from {addr:?} for idle session {process_id}");
        }
    }

    // The client is waiting for EOF; a failing shutdown changes nothing.
    let _ = stream.shutdown().await;
    Ok(())
}
