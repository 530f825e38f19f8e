//! HTTP transport capability used by the API client.
//!
//! The API client only needs `request(method, url, headers, body) -> (status, body)`.
//! `ReqwestTransport` is the production implementation; connection handling,
//! TLS and basic authentication live here and nowhere else.

use async_trait::async_trait;
use reqwest::Method;

use crate::config::{ClientConfig, Credentials};
use crate::error::{Result, TransportError};
use crate::tls::TlsMaterial;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        request: HttpRequest,
    ) -> std::result::Result<HttpResponse, TransportError>;
}

/// `reqwest`-backed transport. The underlying client pools connections and
/// is cheap to share between concurrent requests.
pub struct ReqwestTransport {
    client: reqwest::Client,
    credentials: Option<Credentials>,
}

impl ReqwestTransport {
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let material = TlsMaterial::load(&config.tls).await?;
        let builder = reqwest::Client::builder().timeout(config.request_timeout);
        let client = material
            .apply(builder)
            .build()
            .map_err(TransportError::from)?;

        Ok(Self {
            client,
            credentials: config.credentials.clone(),
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn request(
        &self,
        request: HttpRequest,
    ) -> std::result::Result<HttpResponse, TransportError> {
        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref creds) = self.credentials {
            builder = builder.basic_auth(&creds.username, Some(&creds.password));
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse { status, body })
    }
}
