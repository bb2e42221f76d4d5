//! HTTP transport stack.
//!
//! A `Transport` is anything that can send one request and produce one
//! response. Decorators wrap an inner transport and add behavior: retry with
//! backoff (`RetryTransport`) and bearer-token repair (`AuthTransport`).
//! The ordering used by the client is retry → auth → network, so a repaired
//! request still benefits from the retry budget of its caller.

pub mod auth;
pub mod retry;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Client, Request, Response};

use crate::api::error::ApiError;
use crate::config::Config;

pub use auth::AuthTransport;
pub use retry::{RetryPolicy, RetryTransport};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, req: Request) -> Result<Response, ApiError>;
}

/// The innermost transport: a shared reqwest client. Clone is cheap, the
/// underlying connection pool is reference-counted.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, req: Request) -> Result<Response, ApiError> {
        self.client.execute(req).await.map_err(Into::into)
    }
}

/// Build the reqwest client shared by every transport stack: rustls, TLS 1.2
/// minimum, request timeout from config, and an optional extra root CA for
/// servers with a private PKI.
pub fn build_http_client(cfg: &Config) -> Result<Client, ApiError> {
    let mut builder = Client::builder()
        .use_rustls_tls()
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .timeout(Duration::from_secs(cfg.retry.timeout_secs));

    if let Some(path) = &cfg.tls.ca_cert_path {
        let pem = std::fs::read(path)
            .map_err(|e| ApiError::Validation(format!("read CA cert {path}: {e}")))?;
        let cert = Certificate::from_pem(&pem)
            .map_err(|e| ApiError::Validation(format!("parse CA cert {path}: {e}")))?;
        builder = builder.add_root_certificate(cert);
    }

    builder.build().map_err(Into::into)
}
