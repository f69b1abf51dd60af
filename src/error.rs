//! # Error Handling
//!
//! Domain error types for the job store and delivery pipeline, plus the
//! problem+json [`ApiError`] returned by the admin HTTP surface.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::client::ClientError;
use crate::distributor::DistributionError;
use crate::telemetry;

/// Errors raised by the job store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error during {context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: sea_orm::DbErr,
    },
    #[error("job {0} not found")]
    JobNotFound(uuid::Uuid),
}

impl StoreError {
    pub(crate) fn db(context: &'static str) -> impl FnOnce(sea_orm::DbErr) -> StoreError {
        move |source| {
            tracing::error!(error = %source, context, "job store query failed");
            StoreError::Database { context, source }
        }
    }
}

/// Why a single job delivery attempt failed. Every variant is recorded on
/// the job and retried until attempts run out.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("transport failed: {0}")]
    Transport(String),
    #[error("provider rejected order: {0}")]
    ProviderRejection(String),
    #[error("unexpected provider response: {0}")]
    UnexpectedResponse(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DeliveryError {
    /// Label used for the `outcome` metric dimension
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryError::Validation(_) => "validation",
            DeliveryError::Transport(_) => "transport",
            DeliveryError::ProviderRejection(_) => "rejected",
            DeliveryError::UnexpectedResponse(_) => "unexpected",
            DeliveryError::Store(_) => "store",
        }
    }
}

impl From<ClientError> for DeliveryError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Transport(message) => DeliveryError::Transport(message),
            ClientError::HttpStatus { status, body } => {
                DeliveryError::Transport(format!("HTTP {status}: {}", truncate(&body, 200)))
            }
            ClientError::ProviderRejection(message) => DeliveryError::ProviderRejection(message),
            ClientError::UnexpectedResponse(raw) | ClientError::Decode(raw) => {
                DeliveryError::UnexpectedResponse(truncate(&raw, 200))
            }
            ClientError::NotConfigured(what) => {
                DeliveryError::Validation(format!("provider not configured: {what}"))
            }
        }
    }
}

impl From<DistributionError> for DeliveryError {
    fn from(error: DistributionError) -> Self {
        DeliveryError::Validation(error.to_string())
    }
}

pub(crate) fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() > max_chars {
        let truncated: String = value.chars().take(max_chars).collect();
        format!("{}...", truncated)
    } else {
        value.to_string()
    }
}

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

const PG_UNIQUE: &str = "23505";
const MYSQL_DUPLICATE_CODES: &[&str] = &["1022", "1062", "1169", "1586"];
const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

/// Vendor error codes that mean a duplicate key on Postgres, MySQL or SQLite.
fn is_duplicate_code(code: &str) -> bool {
    code == PG_UNIQUE
        || MYSQL_DUPLICATE_CODES.contains(&code)
        || SQLITE_DUPLICATE_CODES.contains(&code)
}

/// Whether a database error is a unique constraint violation.
pub fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error
        .code()
        .is_some_and(|code| is_duplicate_code(&code))
}

/// Upstream provider error information
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProviderError {
    /// HTTP status code from upstream, if the provider answered at all
    pub status: Option<u16>,
    /// Response body or transport message (truncated)
    pub body_snippet: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        validation_error(
            "Invalid query parameters",
            json!({ "query": rejection.body_text() }),
        )
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::JobNotFound(id) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Job {} not found", id),
            ),
            StoreError::Database {
                source: sea_orm::DbErr::Conn(_),
                ..
            } => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "Database service unavailable",
            ),
            StoreError::Database { .. } => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                "Database error occurred",
            ),
        }
    }
}

impl From<ClientError> for ApiError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::NotConfigured(what) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "PROVIDER_NOT_CONFIGURED",
                &format!("Provider {} is not configured", what),
            ),
            ClientError::HttpStatus { status, body } => provider_error(Some(status), Some(body)),
            ClientError::ProviderRejection(message)
            | ClientError::Transport(message)
            | ClientError::UnexpectedResponse(message)
            | ClientError::Decode(message) => provider_error(None, Some(message)),
        }
    }
}

/// Create a provider upstream error (always 502)
pub fn provider_error(status: Option<u16>, body: Option<String>) -> ApiError {
    let provider_error = ProviderError {
        status,
        body_snippet: body.map(|b| truncate(&b, 200)),
    };

    let message = match status {
        Some(status) => format!("Provider returned error status {}", status),
        None => "Provider request failed".to_string(),
    };

    ApiError::new(StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", &message)
        .with_details(json!(provider_error))
}

/// Create a conflict error (409)
pub fn conflict(message: &str) -> ApiError {
    ApiError::new(StatusCode::CONFLICT, "CONFLICT", message)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}
