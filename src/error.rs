use thiserror::Error;

use crate::tls::TlsError;

/// Failures below the HTTP layer: the request never produced a status code.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum DkronError {
    #[error("Invalid job definition: {0}")]
    Validation(String),

    #[error("Cluster returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to decode {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),
}

impl DkronError {
    pub fn validation(msg: impl Into<String>) -> Self {
        DkronError::Validation(msg.into())
    }

    /// True when the cluster answered 404 for the requested resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DkronError::Api { status: 404, .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DkronError::Transport(TransportError::Timeout(_)))
    }
}

pub type Result<T> = std::result::Result<T, DkronError>;
