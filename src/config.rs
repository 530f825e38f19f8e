use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DkronError, Result};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 4;

/// Address of one cluster node. Any node answers the read API and forwards
/// writes to the leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterEndpoint {
    pub host: String,
    pub port: u16,
    pub use_ssl: bool,
}

impl Default for ClusterEndpoint {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            use_ssl: false,
        }
    }
}

impl ClusterEndpoint {
    pub fn new(host: impl Into<String>, port: u16, use_ssl: bool) -> Self {
        Self {
            host: host.into(),
            port,
            use_ssl,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.use_ssl {
            "https"
        } else {
            "http"
        }
    }

    /// Base URL of the versioned API, without a trailing slash.
    pub fn root_url(&self) -> String {
        format!("{}://{}:{}/v1", self.scheme(), self.host, self.port)
    }
}

/// Basic-auth credentials for clusters sitting behind an authenticating proxy.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Build credentials from optional halves. Blank strings count as missing.
    ///
    /// Returns `Ok(None)` when neither half is given and a validation error
    /// when only one is.
    pub fn from_parts(username: Option<&str>, password: Option<&str>) -> Result<Option<Self>> {
        let username = username.map(str::trim).filter(|u| !u.is_empty());
        let password = password.filter(|p| !p.is_empty());

        match (username, password) {
            (Some(username), Some(password)) => Ok(Some(Self {
                username: username.to_string(),
                password: password.to_string(),
            })),
            (None, None) => Ok(None),
            (Some(_), None) => Err(DkronError::validation(
                "password is required when username is set",
            )),
            (None, Some(_)) => Err(DkronError::validation(
                "username is required when password is set",
            )),
        }
    }
}

/// TLS settings for HTTPS connections to the cluster.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Extra root certificate (PEM) trusted in addition to the system roots.
    pub ca_cert_path: Option<PathBuf>,

    /// Client certificate (PEM) presented when the proxy requires mTLS.
    pub cert_path: Option<PathBuf>,

    /// Private key (PEM) matching `cert_path`.
    pub key_path: Option<PathBuf>,

    /// Skip server certificate verification. Development only.
    pub accept_invalid_certs: bool,
}

impl TlsConfig {
    /// True when a client identity is fully configured.
    pub fn has_identity(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }
}

/// What the Aggregator does when one of its independent reads fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartialFailurePolicy {
    /// Abort the whole aggregation on the first failed read.
    FailFast,
    /// Keep going and attach an error marker to the affected entry.
    #[default]
    BestEffort,
}

/// Immutable client configuration shared by every call of one invocation.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: ClusterEndpoint,
    pub credentials: Option<Credentials>,
    pub tls: TlsConfig,
    pub request_timeout: Duration,
    pub max_concurrent_requests: usize,
    pub partial_failure: PartialFailurePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: ClusterEndpoint::default(),
            credentials: None,
            tls: TlsConfig::default(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            partial_failure: PartialFailurePolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: ClusterEndpoint) -> Self {
        Self {
            endpoint,
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    pub fn with_partial_failure(mut self, policy: PartialFailurePolicy) -> Self {
        self.partial_failure = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.host.trim().is_empty() {
            return Err(DkronError::validation("endpoint must not be empty"));
        }
        if self.max_concurrent_requests == 0 {
            return Err(DkronError::validation(
                "max_concurrent_requests must be at least 1",
            ));
        }
        if self.tls.cert_path.is_some() != self.tls.key_path.is_some() {
            return Err(DkronError::validation(
                "client certificate and key must be configured together",
            ));
        }
        Ok(())
    }
}
