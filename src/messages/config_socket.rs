use std::time::Duration;

use log::warn;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

use crate::config::General;

/// Apply keepalive and nodelay settings to an accepted client socket.
pub fn configure_tcp_socket(stream: &TcpStream, general: &General) {
    let sock_ref = SockRef::from(stream);

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(general.tcp_keepalives_idle))
        .with_interval(Duration::from_secs(general.tcp_keepalives_interval))
        .with_retries(general.tcp_keepalives_count);
    if let Err(err) = sock_ref.set_tcp_keepalive(&keepalive) {
        warn!("Could not configure tcp keepalive for socket: {err}");
    }

    if let Err(err) = stream.set_nodelay(general.tcp_no_delay) {
        warn!("Could not configure nodelay for socket: {err}");
    }
}

/// Cancel connections must end with a FIN, not a reset: libpq-based clients
/// report "query cancellation failed" when the server aborts the socket.
pub fn configure_tcp_socket_for_cancel(stream: &TcpStream) {
    let sock_ref = SockRef::from(stream);
    if let Err(err) = sock_ref.set_linger(None) {
        warn!("Could not disable linger for cancel socket: {err}");
    }
}
