//! TLS utilities for HTTPS connections to the cluster.
//!
//! Loads an optional extra root CA and an optional client identity from PEM
//! files and applies them to a `reqwest` client builder.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::config::TlsConfig;

/// Error type for TLS configuration issues.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("CA certificate not found: {0}")]
    CaCertNotFound(PathBuf),

    #[error("Client certificate not found: {0}")]
    CertNotFound(PathBuf),

    #[error("Private key not found: {0}")]
    KeyNotFound(PathBuf),

    #[error("Client certificate configured without a private key")]
    MissingKey,

    #[error("Invalid CA certificate: {0}")]
    InvalidCaCert(String),

    #[error("Invalid client identity: {0}")]
    InvalidIdentity(String),

    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),
}

/// Loaded TLS materials ready to be handed to `reqwest`.
pub struct TlsMaterial {
    ca_cert: Option<reqwest::Certificate>,
    identity: Option<reqwest::Identity>,
    accept_invalid_certs: bool,
}

impl TlsMaterial {
    /// Load TLS materials from the paths in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured file does not exist, cannot be read,
    /// or does not contain usable PEM data.
    pub async fn load(config: &TlsConfig) -> Result<Self, TlsError> {
        let ca_cert = match config.ca_cert_path {
            Some(ref path) => {
                let pem = read_existing(path, TlsError::CaCertNotFound).await?;
                let cert = reqwest::Certificate::from_pem(&pem)
                    .map_err(|e| TlsError::InvalidCaCert(e.to_string()))?;
                Some(cert)
            }
            None => None,
        };

        let identity = match (&config.cert_path, &config.key_path) {
            (Some(cert_path), Some(key_path)) => {
                let mut pem = read_existing(cert_path, TlsError::CertNotFound).await?;
                let key_pem = read_existing(key_path, TlsError::KeyNotFound).await?;
                // rustls expects certificate chain and key in one PEM buffer
                pem.push(b'\n');
                pem.extend_from_slice(&key_pem);
                let identity = reqwest::Identity::from_pem(&pem)
                    .map_err(|e| TlsError::InvalidIdentity(e.to_string()))?;
                Some(identity)
            }
            (Some(_), None) => return Err(TlsError::MissingKey),
            _ => None,
        };

        Ok(Self {
            ca_cert,
            identity,
            accept_invalid_certs: config.accept_invalid_certs,
        })
    }

    pub fn apply(self, mut builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        if let Some(cert) = self.ca_cert {
            builder = builder.add_root_certificate(cert);
        }
        if let Some(identity) = self.identity {
            builder = builder.identity(identity);
        }
        if self.accept_invalid_certs {
            tracing::warn!("TLS certificate verification disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }
        builder
    }
}

async fn read_existing(
    path: &Path,
    not_found: fn(PathBuf) -> TlsError,
) -> Result<Vec<u8>, TlsError> {
    if !path.exists() {
        return Err(not_found(path.to_path_buf()));
    }
    Ok(fs::read(path).await?)
}
