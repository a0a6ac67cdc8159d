//! Accept loop and the state shared by every connection task.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::net::TcpListener;
use tokio_native_tls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthMethod, CredentialStore};
use crate::client::{client_entrypoint, client_entrypoint_too_many_clients_already};
use crate::config::{General, TlsMode};
use crate::errors::Error;
use crate::messages::configure_tcp_socket;
use crate::query::QueryHandler;
use crate::session::{BackendKeyGenerator, RandomKeyGenerator, SessionRegistry};
use crate::stats::ServerStats;
use crate::utils::format_duration;

/// Everything a connection task needs, handed out as one `Arc`.
pub(crate) struct ServerState {
    pub(crate) handler: Arc<dyn QueryHandler>,
    pub(crate) key_generator: Arc<dyn BackendKeyGenerator>,
    pub(crate) credentials: Arc<dyn CredentialStore>,
    pub(crate) tls_acceptor: Option<TlsAcceptor>,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) stats: Arc<ServerStats>,
    pub(crate) general: General,
    /// Parent of every connection token; cancelled on shutdown.
    pub(crate) shutdown: CancellationToken,
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    handler: Arc<dyn QueryHandler>,
    key_generator: Arc<dyn BackendKeyGenerator>,
    credentials: Arc<dyn CredentialStore>,
    tls_acceptor: Option<TlsAcceptor>,
    registry: Option<Arc<SessionRegistry>>,
    general: General,
}

impl ServerBuilder {
    /// Socket, logging and protocol settings. Overrides anything set before.
    pub fn config(mut self, general: General) -> ServerBuilder {
        self.general = general;
        self
    }

    pub fn backend_key_generator(mut self, generator: impl BackendKeyGenerator) -> ServerBuilder {
        self.key_generator = Arc::new(generator);
        self
    }

    pub fn auth(mut self, method: AuthMethod, credentials: impl CredentialStore) -> ServerBuilder {
        self.general.auth_method = method;
        self.credentials = Arc::new(credentials);
        self
    }

    pub fn tls(mut self, acceptor: TlsAcceptor) -> ServerBuilder {
        self.tls_acceptor = Some(acceptor);
        self
    }

    pub fn tls_mode(mut self, mode: TlsMode) -> ServerBuilder {
        self.general.tls_mode = mode;
        self
    }

    /// Use an existing registry, e.g. to share it between servers.
    pub fn registry(mut self, registry: Arc<SessionRegistry>) -> ServerBuilder {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Server {
        Server {
            state: Arc::new(ServerState {
                handler: self.handler,
                key_generator: self.key_generator,
                credentials: self.credentials,
                tls_acceptor: self.tls_acceptor,
                registry: self.registry.unwrap_or_default(),
                stats: Arc::new(ServerStats::new()),
                general: self.general,
                shutdown: CancellationToken::new(),
            }),
        }
    }
}

/// A PostgreSQL protocol server.
#[derive(Clone)]
pub struct Server {
    state: Arc<ServerState>,
}

impl Server {
    pub fn builder(handler: impl QueryHandler) -> ServerBuilder {
        ServerBuilder {
            handler: Arc::new(handler),
            key_generator: Arc::new(RandomKeyGenerator),
            credentials: Arc::new(std::collections::HashMap::<String, String>::new()),
            tls_acceptor: None,
            registry: None,
            general: General::default(),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.state.registry
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.state.stats
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Serve until the process ends.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Error> {
        self.serve_with_shutdown(listener, std::future::pending())
            .await
    }

    /// Serve until `signal` resolves, then cancel every running query and
    /// wait up to `shutdown_timeout` for connections to close.
    pub async fn serve_with_shutdown<F>(&self, listener: TcpListener, signal: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let state = &self.state;
        let addr = listener.local_addr()?;
        info!("Waiting for clients on {addr}");

        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("Shutdown requested, no longer accepting clients");
                    break;
                }

                // new client.
                new_client = listener.accept() => {
                    let (socket, addr) = match new_client {
                        Ok((socket, addr)) => (socket, addr),
                        Err(err) => {
                            error!("accept error: {err:?}");
                            continue;
                        }
                    };

                    configure_tcp_socket(&socket, &state.general);
                    let state = Arc::clone(state);
                    let log_client_disconnections = state.general.log_client_disconnections;
                    let max_connections = state.general.max_connections;

                    tokio::task::spawn(async move {
                        let _connection = state.stats.connection_opened();
                        // max clients.
                        if state.stats.current_connections() as u64 > max_connections {
                            warn!("Client {addr:?}: too many clients already");
                            if let Err(err) = client_entrypoint_too_many_clients_already(socket, &state).await {
                                error!("Client {addr:?}: disconnected with error: {err}");
                            }
                            return;
                        }
                        let start = chrono::offset::Utc::now().naive_utc();

                        match client_entrypoint(socket, Arc::clone(&state)).await {
                            Ok(()) => {
                                let duration = chrono::offset::Utc::now().naive_utc() - start;
                                if log_client_disconnections {
                                    info!(
                                        "Client {:?} disconnected, session duration: {}",
                                        addr,
                                        format_duration(&duration)
                                    );
                                } else {
                                    debug!(
                                        "Client {:?} disconnected, session duration: {}",
                                        addr,
                                        format_duration(&duration)
                                    );
                                }
                            }

                            Err(Error::ShuttingDown) => {
                                debug!("Client {addr:?} closed by shutdown");
                            }

                            Err(err) => {
                                let duration = chrono::offset::Utc::now().naive_utc() - start;
                                warn!("Client {:?} disconnected with error {:?}, duration: {}", addr, err, format_duration(&duration));
                            }
                        };
                    });
                }
            }
        }
        drop(listener);

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&self) {
        let state = &self.state;
        state.shutdown.cancel();

        let shutdown_timeout = state.general.shutdown_timeout();
        let start = std::time::Instant::now();
        let mut interval = tokio::time::interval(Duration::from_millis(50));
        loop {
            interval.tick().await;
            let clients_total = state.stats.current_connections();
            if clients_total == 0 {
                info!("All clients disconnected, shutting down");
                break;
            }
            if start.elapsed() >= shutdown_timeout {
                error!("Graceful shutdown timed out, {clients_total} clients still connected");
                break;
            }
        }
        info!("Server stats: {}", state.stats.snapshot());
    }
}
