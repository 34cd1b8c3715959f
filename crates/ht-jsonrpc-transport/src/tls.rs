//! TLS configuration and certificate loading.

use axum_server::tls_rustls::RustlsConfig;

use crate::config::TlsConfig;
use crate::error::{ConfigError, ServerError};

/// Load the server-side rustls config from the PEM files.
pub async fn load_server_config(tls: &TlsConfig) -> Result<RustlsConfig, ServerError> {
    for path in [&tls.cert_path, &tls.key_path] {
        if !path.exists() {
            return Err(ServerError::Tls {
                path: path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            });
        }
    }

    install_crypto_provider();

    RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .map_err(|source| ServerError::Tls {
            path: tls.cert_path.clone(),
            source,
        })
}

/// Read the configured certificate so the client can trust it as a root.
pub fn load_root_certificate(tls: &TlsConfig) -> Result<reqwest::Certificate, ConfigError> {
    let pem = std::fs::read(&tls.cert_path).map_err(|source| ConfigError::Certificate {
        path: tls.cert_path.clone(),
        source,
    })?;
    Ok(reqwest::Certificate::from_pem(&pem)?)
}

// More than one rustls backend is compiled in; the process default must be
// set explicitly before building a server config.
fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}
