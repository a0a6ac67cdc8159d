use log::{error, info};
use std::path::Path;

use crate::config::tls::build_acceptor;
use crate::config::Config;

/// Build the TLS acceptor when a certificate is configured. Exits with
/// `EX_CONFIG` when the identity cannot be loaded.
pub fn init_tls(config: &Config) -> Option<tokio_native_tls::TlsAcceptor> {
    let (Some(certificate), Some(private_key)) = (
        config.general.tls_certificate.as_ref(),
        config.general.tls_private_key.as_ref(),
    ) else {
        return None;
    };

    match build_acceptor(Path::new(certificate), Path::new(private_key)) {
        Ok(acceptor) => {
            info!("TLS enabled with certificate {certificate}");
            Some(acceptor)
        }
        Err(err) => {
            error!("Failed to build TLS acceptor: {err}");
            std::process::exit(exitcode::CONFIG);
        }
    }
}
