//! # Provider API Client
//!
//! Client for the action-dispatched SMM panel protocol: every call is a
//! form-encoded POST to one endpoint carrying `key` and `action`.
//!
//! Requests go through an ordered chain of [`Transport`]s. A transport that
//! fails before producing an HTTP response hands over to the next one; the
//! first HTTP response wins, and a status of 400 or above is an error
//! without further fallback.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::provider::{
    ConfigProvider, KEY_API_KEY, KEY_API_URL, KEY_CONNECT_TIMEOUT_SECONDS, KEY_DEFAULT_SERVICE_ID,
    KEY_TIMEOUT_SECONDS,
};
use crate::orders::DripFeed;

pub mod response;
pub mod transport;

pub use response::{Balance, OrderStatus, ProviderResponse, ServiceEntry};
pub use transport::{ReqwestTransport, Transport, TransportError, TransportResponse};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("all transports failed: {0}")]
    Transport(String),
    #[error("provider returned HTTP {status}")]
    HttpStatus { status: u16, body: String },
    #[error("could not decode provider response: {0}")]
    Decode(String),
    #[error("provider rejected request: {0}")]
    ProviderRejection(String),
    #[error("unexpected provider response: {0}")]
    UnexpectedResponse(String),
    #[error("missing {0}")]
    NotConfigured(&'static str),
}

/// Provider endpoint and credentials, read fresh from a [`ConfigProvider`].
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub api_url: String,
    pub api_key: String,
    pub default_service_id: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl ProviderSettings {
    pub fn resolve(source: &dyn ConfigProvider) -> Result<Self, ClientError> {
        let non_empty = |key: &str| source.get(key).filter(|value| !value.trim().is_empty());
        let seconds = |key: &str, default: u64| {
            source
                .get(key)
                .and_then(|value| value.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(default)
        };

        let api_url = non_empty(KEY_API_URL).ok_or(ClientError::NotConfigured("api_url"))?;
        let api_key = non_empty(KEY_API_KEY).ok_or(ClientError::NotConfigured("api_key"))?;

        let timeout = seconds(KEY_TIMEOUT_SECONDS, 30);
        let connect_timeout = seconds(KEY_CONNECT_TIMEOUT_SECONDS, 10).min(timeout);

        Ok(Self {
            api_url: api_url.trim().to_string(),
            api_key: api_key.trim().to_string(),
            default_service_id: non_empty(KEY_DEFAULT_SERVICE_ID).map(|v| v.trim().to_string()),
            timeout: Duration::from_secs(timeout),
            connect_timeout: Duration::from_secs(connect_timeout),
        })
    }
}

pub struct SmmClient {
    settings: ProviderSettings,
    transports: Vec<Arc<dyn Transport>>,
}

impl SmmClient {
    /// Client with the built-in chain: native, then url-fetch, then `host`
    /// when the embedding application supplies its own transport.
    pub fn new(
        settings: ProviderSettings,
        host: Option<Arc<dyn Transport>>,
    ) -> Result<Self, ClientError> {
        let build_error = |err: TransportError| ClientError::Transport(err.to_string());

        let native: Arc<dyn Transport> = Arc::new(
            ReqwestTransport::insecure(settings.timeout, settings.connect_timeout)
                .map_err(build_error)?,
        );
        let url_fetch: Arc<dyn Transport> = Arc::new(
            ReqwestTransport::url_fetch(settings.timeout, settings.connect_timeout)
                .map_err(build_error)?,
        );

        let mut transports = vec![native, url_fetch];
        transports.extend(host);

        Ok(Self::with_transports(settings, transports))
    }

    pub fn with_transports(settings: ProviderSettings, transports: Vec<Arc<dyn Transport>>) -> Self {
        Self {
            settings,
            transports,
        }
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Place an order (`action=add`).
    pub async fn submit_order(
        &self,
        service_id: &str,
        target: &str,
        quantity: i64,
        drip_feed: &DripFeed,
    ) -> Result<ProviderResponse, ClientError> {
        let mut params = vec![
            ("service", service_id.to_string()),
            ("link", target.to_string()),
            ("quantity", quantity.to_string()),
        ];
        if let Some(runs) = drip_feed.runs {
            params.push(("runs", runs.to_string()));
        }
        if let Some(interval) = drip_feed.interval {
            params.push(("interval", interval.to_string()));
        }
        if let Some(comments) = &drip_feed.comments {
            params.push(("comments", comments.clone()));
        }

        let body = self.call("add", &params).await?;
        Ok(ProviderResponse::from_body(&body))
    }

    pub async fn status(&self, provider_job_id: &str) -> Result<OrderStatus, ClientError> {
        self.call_typed("status", &[("order", provider_job_id.to_string())])
            .await
    }

    pub async fn balance(&self) -> Result<Balance, ClientError> {
        self.call_typed("balance", &[]).await
    }

    pub async fn services(&self) -> Result<Vec<ServiceEntry>, ClientError> {
        self.call_typed("services", &[]).await
    }

    /// Request a refill; the answer shape varies per provider.
    pub async fn refill(&self, provider_job_ids: &[String]) -> Result<Value, ClientError> {
        self.call_typed("refill", &order_params(provider_job_ids)).await
    }

    /// Request cancellation; the answer shape varies per provider.
    pub async fn cancel(&self, provider_job_ids: &[String]) -> Result<Value, ClientError> {
        self.call_typed("cancel", &order_params(provider_job_ids)).await
    }

    async fn call_typed<T: DeserializeOwned>(
        &self,
        action: &str,
        params: &[(&str, String)],
    ) -> Result<T, ClientError> {
        let body = self.call(action, params).await?;
        let value: Value =
            serde_json::from_str(&body).map_err(|_| ClientError::Decode(body.clone()))?;

        if let Some(message) = response::error_message(&value) {
            return Err(ClientError::ProviderRejection(message));
        }

        serde_json::from_value(value).map_err(|_| ClientError::UnexpectedResponse(body))
    }

    /// POST the action through the transport chain and return the body.
    async fn call(&self, action: &str, params: &[(&str, String)]) -> Result<String, ClientError> {
        let mut form = Vec::with_capacity(params.len() + 2);
        form.push(("key".to_string(), self.settings.api_key.clone()));
        form.push(("action".to_string(), action.to_string()));
        form.extend(params.iter().map(|(k, v)| (k.to_string(), v.clone())));

        let mut failures = Vec::new();

        for transport in &self.transports {
            match transport.post_form(&self.settings.api_url, &form).await {
                Ok(response) if response.status >= 400 => {
                    warn!(
                        action,
                        transport = transport.name(),
                        status = response.status,
                        "Provider returned HTTP error"
                    );
                    return Err(ClientError::HttpStatus {
                        status: response.status,
                        body: response.body,
                    });
                }
                Ok(response) => {
                    debug!(
                        action,
                        transport = transport.name(),
                        status = response.status,
                        "Provider responded"
                    );
                    return Ok(response.body);
                }
                Err(err) => {
                    warn!(action, transport = transport.name(), error = %err, "Transport failed");
                    metrics::counter!(
                        "smm_transport_fallbacks_total",
                        "transport" => transport.name().to_string()
                    )
                    .increment(1);
                    failures.push(err.to_string());
                }
            }
        }

        if failures.is_empty() {
            failures.push("no transports configured".to_string());
        }
        Err(ClientError::Transport(failures.join("; ")))
    }
}

fn order_params(provider_job_ids: &[String]) -> Vec<(&'static str, String)> {
    match provider_job_ids {
        [single] => vec![("order", single.clone())],
        many => vec![("orders", many.join(","))],
    }
}
