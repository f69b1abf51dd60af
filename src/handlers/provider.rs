//! # Provider Pass-through Handlers

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::client::{Balance, OrderStatus, ProviderSettings, ServiceEntry, SmmClient};
use crate::error::{ApiError, StoreError, conflict};
use crate::server::AppState;

fn client(state: &AppState) -> Result<SmmClient, ApiError> {
    let settings = ProviderSettings::resolve(state.provider_config.as_ref())?;
    Ok(SmmClient::new(settings, None)?)
}

/// Provider account balance
#[utoipa::path(
    get,
    path = "/provider/balance",
    responses(
        (status = 200, description = "Current balance", body = Balance),
        (status = 502, description = "Provider error", body = ApiError),
        (status = 503, description = "Provider not configured", body = ApiError)
    ),
    tag = "provider"
)]
pub async fn provider_balance(State(state): State<AppState>) -> Result<Json<Balance>, ApiError> {
    Ok(Json(client(&state)?.balance().await?))
}

/// Provider service catalog
#[utoipa::path(
    get,
    path = "/provider/services",
    responses(
        (status = 200, description = "Services offered by the provider", body = [ServiceEntry]),
        (status = 502, description = "Provider error", body = ApiError),
        (status = 503, description = "Provider not configured", body = ApiError)
    ),
    tag = "provider"
)]
pub async fn provider_services(
    State(state): State<AppState>,
) -> Result<Json<Vec<ServiceEntry>>, ApiError> {
    Ok(Json(client(&state)?.services().await?))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProviderOrderStatus {
    #[schema(example = "555")]
    pub provider_job_id: String,
    pub status: OrderStatus,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobProviderStatusResponse {
    pub job_id: String,
    /// One entry per provider order placed for the job, in target order
    pub orders: Vec<ProviderOrderStatus>,
}

/// Provider answer to a refill or cancel request for a job
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProviderActionResponse {
    pub job_id: String,
    pub provider_job_ids: Vec<String>,
    #[schema(value_type = Object)]
    pub response: Value,
}

/// Provider order ids recorded for a delivered job.
async fn delivered_provider_ids(state: &AppState, job_id: Uuid) -> Result<Vec<String>, ApiError> {
    let job = state
        .jobs
        .find(job_id)
        .await?
        .ok_or(StoreError::JobNotFound(job_id))?;

    let ids: Vec<String> = job
        .provider_job_id
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();

    if ids.is_empty() {
        return Err(conflict("Job has not been delivered yet"));
    }
    Ok(ids)
}

/// Provider-side status of a delivered job
#[utoipa::path(
    get,
    path = "/jobs/{job_id}/provider-status",
    params(("job_id" = Uuid, Path, description = "Job id")),
    responses(
        (status = 200, description = "Status of every provider order of the job", body = JobProviderStatusResponse),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 409, description = "Job has not been delivered", body = ApiError),
        (status = 502, description = "Provider error", body = ApiError),
        (status = 503, description = "Provider not configured", body = ApiError)
    ),
    tag = "provider"
)]
pub async fn job_provider_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobProviderStatusResponse>, ApiError> {
    let provider_job_ids = delivered_provider_ids(&state, job_id).await?;
    let client = client(&state)?;

    let mut orders = Vec::with_capacity(provider_job_ids.len());
    for provider_job_id in provider_job_ids {
        let status = client.status(&provider_job_id).await?;
        orders.push(ProviderOrderStatus {
            provider_job_id,
            status,
        });
    }

    Ok(Json(JobProviderStatusResponse {
        job_id: job_id.to_string(),
        orders,
    }))
}

/// Ask the provider to refill every order of a delivered job
#[utoipa::path(
    post,
    path = "/jobs/{job_id}/refill",
    params(("job_id" = Uuid, Path, description = "Job id")),
    responses(
        (status = 200, description = "Provider answer", body = ProviderActionResponse),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 409, description = "Job has not been delivered", body = ApiError),
        (status = 502, description = "Provider error", body = ApiError),
        (status = 503, description = "Provider not configured", body = ApiError)
    ),
    tag = "provider"
)]
pub async fn refill_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ProviderActionResponse>, ApiError> {
    let provider_job_ids = delivered_provider_ids(&state, job_id).await?;
    let response = client(&state)?.refill(&provider_job_ids).await?;
    tracing::info!(%job_id, orders = provider_job_ids.len(), "Refill requested");

    Ok(Json(ProviderActionResponse {
        job_id: job_id.to_string(),
        provider_job_ids,
        response,
    }))
}

/// Ask the provider to cancel every order of a delivered job
#[utoipa::path(
    post,
    path = "/jobs/{job_id}/cancel",
    params(("job_id" = Uuid, Path, description = "Job id")),
    responses(
        (status = 200, description = "Provider answer", body = ProviderActionResponse),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 409, description = "Job has not been delivered", body = ApiError),
        (status = 502, description = "Provider error", body = ApiError),
        (status = 503, description = "Provider not configured", body = ApiError)
    ),
    tag = "provider"
)]
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ProviderActionResponse>, ApiError> {
    let provider_job_ids = delivered_provider_ids(&state, job_id).await?;
    let response = client(&state)?.cancel(&provider_job_ids).await?;
    tracing::info!(%job_id, orders = provider_job_ids.len(), "Cancellation requested");

    Ok(Json(ProviderActionResponse {
        job_id: job_id.to_string(),
        provider_job_ids,
        response,
    }))
}
