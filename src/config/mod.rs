//! Configuration module for the server.
//!
//! This module provides configuration parsing, validation and logging of
//! the effective settings. Nothing here is global: `parse` returns the
//! configuration and the caller hands it to whatever needs it.

use log::info;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::auth::AuthMethod;
use crate::errors::Error;

// Sub-modules
mod general;
pub mod tls;


// Re-exports
pub use general::General;
pub use tls::TlsMode;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
}

impl ConfigFormat {
    /// Detect configuration format from file path extension.
    /// Returns Yaml for .yaml/.yml files, Toml for everything else.
    pub fn detect(path: &str) -> Self {
        let path_lower = path.to_lowercase();
        if path_lower.ends_with(".yaml") || path_lower.ends_with(".yml") {
            ConfigFormat::Yaml
        } else {
            ConfigFormat::Toml
        }
    }
}

/// Parse configuration content based on format.
fn parse_config_content<T: serde::de::DeserializeOwned>(
    contents: &str,
    format: ConfigFormat,
) -> Result<T, Error> {
    match format {
        ConfigFormat::Toml => toml::from_str(contents)
            .map_err(|err| Error::BadConfig(format!("TOML parse error: {err}"))),
        ConfigFormat::Yaml => serde_yaml::from_str(contents)
            .map_err(|err| Error::BadConfig(format!("YAML parse error: {err}"))),
    }
}

/// Configuration wrapper.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(
        default = "Config::default_path",
        skip_serializing_if = "String::is_empty"
    )]
    pub path: String,

    #[serde(default)]
    pub general: General,

    /// User name to password, plain or `md5`-prefixed hash.
    #[serde(default)]
    pub users: HashMap<String, String>,
}

impl Config {
    pub fn default_path() -> String {
        String::from("pg_wicket.toml")
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            path: Self::default_path(),
            general: General::default(),
            users: HashMap::default(),
        }
    }
}

impl Config {
    /// Print current configuration.
    pub fn show(&self) {
        info!("Listen address: {}", self.general.listen_addr());
        info!("Worker threads: {}", self.general.worker_threads);
        info!("Max connections: {}", self.general.max_connections);
        info!("Shutdown timeout: {}ms", self.general.shutdown_timeout);
        info!(
            "Log client connections: {}",
            self.general.log_client_connections
        );
        info!(
            "Log client disconnections: {}",
            self.general.log_client_disconnections
        );
        info!("Authentication: {}", self.general.auth_method);
        if self.general.auth_method != AuthMethod::Trust {
            info!("Users: {}", self.users.len());
        }
        match &self.general.tls_certificate {
            Some(tls_certificate) => {
                info!("TLS certificate: {tls_certificate}");
                if let Some(tls_private_key) = &self.general.tls_private_key {
                    info!("TLS private key: {tls_private_key}");
                }
                info!("TLS mode: {}", self.general.tls_mode);
            }
            None => {
                info!("TLS support is disabled");
            }
        };
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), Error> {
        if self.general.worker_threads == 0 {
            return Err(Error::BadConfig(
                "worker_threads should be greater than 0".to_string(),
            ));
        }
        if self.general.row_channel_capacity == 0 {
            return Err(Error::BadConfig(
                "row_channel_capacity should be greater than 0".to_string(),
            ));
        }

        // Validate TLS
        match (&self.general.tls_certificate, &self.general.tls_private_key) {
            (None, Some(_)) => {
                return Err(Error::BadConfig(
                    "tls_private_key is set but tls_certificate is not".to_string(),
                ));
            }
            (Some(_), None) => {
                return Err(Error::BadConfig(
                    "tls_certificate is set but tls_private_key is not".to_string(),
                ));
            }
            (Some(cert), Some(key)) => {
                if let Err(err) = tls::load_identity(Path::new(cert), Path::new(key)) {
                    return Err(Error::BadConfig(format!(
                        "tls is incorrectly configured: {err}"
                    )));
                }
            }
            (None, None) => {
                if self.general.tls_mode == TlsMode::Require {
                    return Err(Error::BadConfig(format!(
                        "tls_mode is {} but tls_certificate or tls_private_key is not set",
                        self.general.tls_mode
                    )));
                }
            }
        }

        if self.general.auth_method != AuthMethod::Trust && self.users.is_empty() {
            return Err(Error::BadConfig(format!(
                "auth_method is {} but no users are configured",
                self.general.auth_method
            )));
        }

        Ok(())
    }
}

async fn load_file(path: &str) -> Result<String, Error> {
    let mut contents = String::new();
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(err) => {
            return Err(Error::BadConfig(format!("Could not open '{path}': {err}")));
        }
    };
    match file.read_to_string(&mut contents).await {
        Ok(_) => (),
        Err(err) => {
            return Err(Error::BadConfig(format!(
                "Could not read config file: {err}"
            )));
        }
    };
    Ok(contents)
}

/// Parse the configuration file located at the path.
/// Supports both TOML (.toml) and YAML (.yaml, .yml) formats.
/// Format is auto-detected based on file extension.
pub async fn parse(path: &str) -> Result<Config, Error> {
    let format = ConfigFormat::detect(path);
    let contents = load_file(path).await?;

    let mut config: Config = parse_config_content(&contents, format)?;
    config.validate()?;
    config.path = path.to_string();

    Ok(config)
}
