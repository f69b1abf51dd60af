//! # Jobs API Handlers
//!
//! Listing, counts, manual sweeps and bulk reset for the job store.

use axum::{
    extract::{Query, State, rejection::QueryRejection},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ApiError, conflict, validation_error};
use crate::ingestion::ResetReport;
use crate::models::smm_job::{self, JobStatus};
use crate::repositories::{JobCounts, JobFilter};
use crate::scheduler::TriggerOutcome;
use crate::server::AppState;
use crate::worker::SweepReport;

const DEFAULT_LIMIT: u64 = 50;
const MAX_LIMIT: u64 = 200;

/// Query parameters for listing jobs
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListJobsQuery {
    /// Filter by status (`pending` or `success`)
    pub status: Option<String>,
    /// Filter by host order id
    pub order_id: Option<i64>,
    /// Only jobs that ran out of attempts (`true`) or only live ones (`false`)
    pub exhausted: Option<bool>,
    /// Page size (default 50, max 200)
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Job as shown to operators
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobInfo {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    #[schema(example = 100)]
    pub order_id: i64,
    #[schema(example = 1)]
    pub line_item_id: i64,
    pub product_id: i64,
    #[schema(example = "username")]
    pub target_kind: String,
    #[schema(example = "alice_ig")]
    pub target_value: String,
    #[schema(example = 50)]
    pub quantity: i64,
    pub multiplier: i32,
    #[schema(example = "4420")]
    pub service_id: Option<String>,
    #[schema(example = "pending")]
    pub status: String,
    pub attempts: i32,
    /// Pending but out of attempts; will not be retried
    pub exhausted: bool,
    #[schema(example = "2026-01-15T10:32:00Z")]
    pub next_attempt_at: String,
    pub last_message: Option<String>,
    #[schema(example = "555")]
    pub provider_job_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobInfo {
    fn from_model(model: smm_job::Model, max_attempts: i32) -> Self {
        Self {
            exhausted: model.is_exhausted(max_attempts),
            id: model.id.to_string(),
            order_id: model.order_id,
            line_item_id: model.line_item_id,
            product_id: model.product_id,
            target_kind: model.target_kind,
            target_value: model.target_value,
            quantity: model.quantity,
            multiplier: model.multiplier,
            service_id: model.service_id,
            status: model.status,
            attempts: model.attempts,
            next_attempt_at: model.next_attempt_at.to_rfc3339(),
            last_message: model.last_message,
            provider_job_id: model.provider_job_id,
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobsResponse {
    pub jobs: Vec<JobInfo>,
}

/// List jobs
#[utoipa::path(
    get,
    path = "/jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "Jobs matching the filters, newest first", body = JobsResponse),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    query: Result<Query<ListJobsQuery>, QueryRejection>,
) -> Result<Json<JobsResponse>, ApiError> {
    let Query(params) = query?;

    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(validation_error(
            "Invalid limit",
            json!({ "limit": format!("Must be between 1 and {MAX_LIMIT}") }),
        ));
    }

    let status = match params.status.as_deref() {
        None => None,
        Some(raw) => Some(JobStatus::parse(raw).ok_or_else(|| {
            validation_error(
                "Invalid status",
                json!({ "status": "Must be one of: pending, success" }),
            )
        })?),
    };

    let filter = JobFilter {
        status,
        order_id: params.order_id,
        exhausted: params.exhausted,
        limit: Some(limit),
        offset: params.offset,
    };

    let max_attempts = state.jobs.policy().max_attempts;
    let jobs = state
        .jobs
        .list(&filter)
        .await?
        .into_iter()
        .map(|model| JobInfo::from_model(model, max_attempts))
        .collect();

    Ok(Json(JobsResponse { jobs }))
}

/// Aggregate job counts
#[utoipa::path(
    get,
    path = "/jobs/counts",
    responses(
        (status = 200, description = "Counts by status, plus exhausted pending jobs", body = JobCounts),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn job_counts(State(state): State<AppState>) -> Result<Json<JobCounts>, ApiError> {
    Ok(Json(state.jobs.counts_by_status().await?))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SweepResponse {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl From<SweepReport> for SweepResponse {
    fn from(report: SweepReport) -> Self {
        Self {
            processed: report.processed,
            succeeded: report.succeeded,
            failed: report.failed,
        }
    }
}

/// Run one retry sweep now
#[utoipa::path(
    post,
    path = "/jobs/sweep",
    responses(
        (status = 200, description = "Sweep finished", body = SweepResponse),
        (status = 409, description = "A sweep is already running", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn run_sweep(State(state): State<AppState>) -> Result<Json<SweepResponse>, ApiError> {
    match state.scheduler.run_manual().await? {
        TriggerOutcome::Ran(report) => Ok(Json(report.into())),
        TriggerOutcome::Busy | TriggerOutcome::TooSoon => {
            Err(conflict("A retry sweep is already running"))
        }
    }
}

/// Delete every job and re-ingest the confirmed order backlog
#[utoipa::path(
    post,
    path = "/jobs/reset",
    responses(
        (status = 200, description = "Store rebuilt", body = ResetReport),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn reset_jobs(State(state): State<AppState>) -> Result<Json<ResetReport>, ApiError> {
    Ok(Json(state.ingestion.reset().await?))
}
