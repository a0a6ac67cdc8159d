//! TLS settings for client connections.

use std::fmt;
use std::fs;
use std::path::Path;

use log::{error, info};
use native_tls::Identity;
use serde_derive::{Deserialize, Serialize};
use tokio_native_tls::TlsAcceptor;

use crate::errors::Error;

/// Whether clients may skip the SSLRequest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plaintext and TLS startups are both accepted.
    #[default]
    Allow,
    /// Plaintext startups are refused. Cancel requests are still accepted
    /// without TLS.
    Require,
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsMode::Allow => write!(f, "allow"),
            TlsMode::Require => write!(f, "require"),
        }
    }
}

/// Load a PEM certificate chain and a PEM PKCS#8 private key.
pub fn load_identity(cert: &Path, key: &Path) -> Result<Identity, Error> {
    let cert_pem = fs::read(cert).map_err(|err| {
        Error::BadConfig(format!("Could not read certificate {}: {err}", cert.display()))
    })?;
    let key_pem = fs::read(key).map_err(|err| {
        Error::BadConfig(format!("Could not read private key {}: {err}", key.display()))
    })?;
    Identity::from_pkcs8(&cert_pem, &key_pem)
        .map_err(|err| Error::BadConfig(format!("Invalid certificate or private key: {err}")))
}

pub fn build_acceptor(cert: &Path, key: &Path) -> Result<TlsAcceptor, Error> {
    let identity = load_identity(cert, key)?;
    match native_tls::TlsAcceptor::new(identity) {
        Ok(acceptor) => {
            info!("TLS acceptor built from {}", cert.display());
            Ok(TlsAcceptor::from(acceptor))
        }
        Err(err) => {
            error!("Could not build TLS acceptor: {err}");
            Err(Error::TlsError)
        }
    }
}
