//! General configuration settings for the server.

use serde_derive::{Deserialize, Serialize};

use super::tls::TlsMode;
use crate::auth::AuthMethod;

/// General configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct General {
    #[serde(default = "General::default_host")]
    pub host: String,

    #[serde(default = "General::default_port")]
    pub port: u16,

    #[serde(default = "General::default_worker_threads")]
    pub worker_threads: usize,

    #[serde(default = "General::default_max_connections")]
    pub max_connections: u64,

    #[serde(default = "General::default_shutdown_timeout")] // 10_000
    pub shutdown_timeout: u64,

    #[serde(default = "General::default_tcp_keepalives_idle")]
    pub tcp_keepalives_idle: u64,
    #[serde(default = "General::default_tcp_keepalives_count")]
    pub tcp_keepalives_count: u32,
    #[serde(default = "General::default_tcp_keepalives_interval")]
    pub tcp_keepalives_interval: u64,
    #[serde(default = "General::default_tcp_no_delay")]
    pub tcp_no_delay: bool,

    #[serde(default = "General::default_log_client_connections")] // True
    pub log_client_connections: bool,

    #[serde(default = "General::default_log_client_disconnections")] // True
    pub log_client_disconnections: bool,

    pub tls_certificate: Option<String>,
    pub tls_private_key: Option<String>,
    #[serde(default)]
    pub tls_mode: TlsMode,

    #[serde(default)]
    pub auth_method: AuthMethod,

    /// Reported to clients in the server_version ParameterStatus.
    #[serde(default = "General::default_server_version")]
    pub server_version: String,

    /// Rows a statement handler may queue before it has to wait for the
    /// client to catch up.
    #[serde(default = "General::default_row_channel_capacity")]
    pub row_channel_capacity: usize,

    pub syslog_prog_name: Option<String>,
}

impl General {
    pub fn default_host() -> String {
        "0.0.0.0".into()
    }

    pub fn default_port() -> u16 {
        6432
    }

    pub fn default_worker_threads() -> usize {
        4
    }

    pub fn default_max_connections() -> u64 {
        8 * 1024
    }

    // 10 seconds
    pub fn default_shutdown_timeout() -> u64 {
        10_000
    }

    // These keepalive defaults should detect a dead connection within 30 seconds.
    pub fn default_tcp_keepalives_idle() -> u64 {
        5 // 5 seconds
    }

    pub fn default_tcp_keepalives_count() -> u32 {
        5 // 5 times
    }

    pub fn default_tcp_keepalives_interval() -> u64 {
        5 // 5 seconds
    }

    pub fn default_tcp_no_delay() -> bool {
        true
    }

    pub fn default_log_client_connections() -> bool {
        true
    }

    pub fn default_log_client_disconnections() -> bool {
        true
    }

    pub fn default_server_version() -> String {
        "16.0".into()
    }

    pub fn default_row_channel_capacity() -> usize {
        64
    }

    /// `host:port` the listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.shutdown_timeout)
    }
}

impl Default for General {
    fn default() -> General {
        General {
            host: Self::default_host(),
            port: Self::default_port(),
            worker_threads: Self::default_worker_threads(),
            max_connections: Self::default_max_connections(),
            shutdown_timeout: Self::default_shutdown_timeout(),
            tcp_keepalives_idle: Self::default_tcp_keepalives_idle(),
            tcp_keepalives_count: Self::default_tcp_keepalives_count(),
            tcp_keepalives_interval: Self::default_tcp_keepalives_interval(),
            tcp_no_delay: Self::default_tcp_no_delay(),
            log_client_connections: Self::default_log_client_connections(),
            log_client_disconnections: Self::default_log_client_disconnections(),
            tls_certificate: None,
            tls_private_key: None,
            tls_mode: TlsMode::default(),
            auth_method: AuthMethod::default(),
            server_version: Self::default_server_version(),
            row_channel_capacity: Self::default_row_channel_capacity(),
            syslog_prog_name: None,
        }
    }
}
