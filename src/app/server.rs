use log::{error, info};
#[cfg(not(windows))]
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::net::TcpSocket;
use tokio::runtime::Builder;

use crate::app::demo::demo_handler;
use crate::app::tls::init_tls;
use crate::config::Config;
use crate::listener::Server;

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(not(windows))]
    {
        let mut term_signal = match unix_signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                error!("Can't install SIGTERM handler: {err}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = term_signal.recv() => info!("Got SIGTERM, starting graceful shutdown"),
            _ = tokio::signal::ctrl_c() => info!("Got SIGINT, starting graceful shutdown"),
        }
    }
    #[cfg(windows)]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Got Ctrl-C, starting graceful shutdown");
    }
}

pub fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let tls_acceptor = init_tls(&config);

    let runtime = Builder::new_multi_thread()
        .worker_threads(config.general.worker_threads)
        .enable_all()
        .thread_name("worker-pg-wicket")
        .build()?;

    runtime.block_on(async move {
        let addr = match tokio::net::lookup_host(config.general.listen_addr()).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => addr,
                None => {
                    error!("Listen address {} did not resolve", config.general.listen_addr());
                    std::process::exit(exitcode::CONFIG);
                }
            },
            Err(err) => {
                error!("Can't resolve {}: {err}", config.general.listen_addr());
                std::process::exit(exitcode::CONFIG);
            }
        };

        let listen_socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        listen_socket.set_reuseaddr(true)?;
        listen_socket.set_nodelay(true)?;
        if let Err(err) = listen_socket.bind(addr) {
            error!("Can't bind {addr}: {err}");
            std::process::exit(exitcode::CONFIG);
        }
        let backlog = config.general.max_connections.min(u32::MAX as u64) as u32;
        let listener = match listen_socket.listen(backlog) {
            Ok(listener) => listener,
            Err(err) => {
                error!("Listener socket error: {err:?}");
                std::process::exit(exitcode::CONFIG);
            }
        };

        info!("Running on {addr}");
        config.show();

        let mut builder = Server::builder(demo_handler())
            .config(config.general.clone())
            .auth(config.general.auth_method, config.users.clone());
        if let Some(acceptor) = tls_acceptor {
            builder = builder.tls(acceptor);
        }
        let server = builder.build();

        server
            .serve_with_shutdown(listener, shutdown_signal())
            .await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    info!("Shutdown complete");
    Ok(())
}
