//! # Order Event Handler
//!
//! Entry point for the host's order lifecycle hooks.

use axum::{
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::ingestion::{IngestError, IngestOutcome};
use crate::orders::OrderEvent;
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderEventResponse {
    /// False when the status is not a confirmed status
    pub ingested: bool,
    pub job_ids: Vec<String>,
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl From<Option<IngestOutcome>> for OrderEventResponse {
    fn from(outcome: Option<IngestOutcome>) -> Self {
        match outcome {
            Some(outcome) => Self {
                ingested: true,
                job_ids: outcome.job_ids.iter().map(ToString::to_string).collect(),
                inserted: outcome.inserted,
                skipped: outcome.skipped,
                failed: outcome.failed,
            },
            None => Self {
                ingested: false,
                job_ids: Vec::new(),
                inserted: 0,
                skipped: 0,
                failed: 0,
            },
        }
    }
}

/// Receive an order status transition
#[utoipa::path(
    post,
    path = "/orders/events",
    request_body = OrderEvent,
    responses(
        (status = 200, description = "Event processed", body = OrderEventResponse),
        (status = 400, description = "Malformed event", body = ApiError),
        (status = 404, description = "Event without snapshot for an unknown order", body = ApiError)
    ),
    tag = "orders"
)]
pub async fn order_event(
    State(state): State<AppState>,
    payload: Result<Json<OrderEvent>, JsonRejection>,
) -> Result<Json<OrderEventResponse>, ApiError> {
    let Json(event) = payload?;

    let outcome = state.ingestion.handle_event(event).await.map_err(|err| match err {
        IngestError::OrderNotFound(id) => ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            &format!("Order {} not found", id),
        ),
        IngestError::Store(store) => store.into(),
    })?;

    // Hosts without a reliable cron still get sweeps through traffic.
    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        if let Err(err) = scheduler.trigger_secondary().await {
            tracing::error!(error = %err, "Secondary sweep trigger failed");
        }
    });

    Ok(Json(outcome.into()))
}
