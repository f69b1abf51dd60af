//! HTTP transports tried in order by the provider client.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Raw provider answer: HTTP status plus body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// The request never produced an HTTP response (DNS, connect, TLS, timeout).
#[derive(Debug, Clone, Error)]
#[error("{transport}: {message}")]
pub struct TransportError {
    pub transport: String,
    pub message: String,
}

/// One way of POSTing a form to the provider endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
    ) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport.
///
/// Certificate verification is disabled on both built-in transports:
/// provider panels routinely serve self-signed or mismatched certificates.
// TODO: allow opting back into verification per provider once panels with valid certificates are onboarded.
pub struct ReqwestTransport {
    name: &'static str,
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Primary transport: pooled client, certificate checks off.
    pub fn insecure(timeout: Duration, connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .user_agent(concat!("smm-dispatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| TransportError {
                transport: "native".to_string(),
                message: err.to_string(),
            })?;

        Ok(Self {
            name: "native",
            client,
        })
    }

    /// Fallback transport: fresh HTTP/1.1 connection per request with no
    /// pooling, for endpoints that break on reused or upgraded connections.
    pub fn url_fetch(timeout: Duration, connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .http1_only()
            .pool_max_idle_per_host(0)
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|err| TransportError {
                transport: "url-fetch".to_string(),
                message: err.to_string(),
            })?;

        Ok(Self {
            name: "url-fetch",
            client,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    fn name(&self) -> &str {
        self.name
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
    ) -> Result<TransportResponse, TransportError> {
        let to_error = |err: reqwest::Error| TransportError {
            transport: self.name.to_string(),
            message: err.to_string(),
        };

        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(to_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(to_error)?;

        Ok(TransportResponse { status, body })
    }
}
