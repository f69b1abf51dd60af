//! # Ingestion Service
//!
//! Converts confirmed orders into job rows, at most one per
//! `(order, line item)` no matter how often the host repeats its events.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::IngestionConfig;
use crate::distributor::raw_link_annotation;
use crate::error::StoreError;
use crate::models::smm_job::TargetKind;
use crate::orders::{Annotations, LineItem, Order, OrderEvent, OrderSource};
use crate::repositories::{JobRepository, NewJob};
use crate::routing::RoutingResolver;

/// Result of ingesting one order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct IngestOutcome {
    /// Job ids for every line item that has one, new or pre-existing
    pub job_ids: Vec<Uuid>,
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Result of a bulk reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ResetReport {
    pub deleted: u64,
    pub ingested: usize,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("order {0} not found")]
    OrderNotFound(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct IngestionService {
    jobs: JobRepository,
    routing: Arc<dyn RoutingResolver>,
    orders: Arc<dyn OrderSource>,
    config: IngestionConfig,
    initial_delay: Duration,
}

impl IngestionService {
    pub fn new(
        jobs: JobRepository,
        routing: Arc<dyn RoutingResolver>,
        orders: Arc<dyn OrderSource>,
        config: IngestionConfig,
        initial_delay: Duration,
    ) -> Self {
        Self {
            jobs,
            routing,
            orders,
            config,
            initial_delay,
        }
    }

    /// Handle an order lifecycle event.
    ///
    /// The snapshot is remembered for later retries; ingestion only runs
    /// when the new status is a confirmed one. Returns `None` when ignored.
    #[instrument(skip_all, fields(order_id = event.order_id, status = %event.status))]
    pub async fn handle_event(&self, event: OrderEvent) -> Result<Option<IngestOutcome>, IngestError> {
        let mut order = match event.order {
            Some(order) => order,
            None => self
                .orders
                .fetch_order(event.order_id)
                .await
                .ok_or(IngestError::OrderNotFound(event.order_id))?,
        };
        order.id = event.order_id;
        order.status = event.status.clone();
        self.orders.remember(order.clone()).await;

        if !self.config.is_confirmed(&event.status) {
            debug!("Order status is not confirmed; nothing to ingest");
            return Ok(None);
        }

        Ok(Some(self.ingest(&order).await))
    }

    /// Create jobs for every line item of `order` that does not have one.
    ///
    /// A failing line item is logged and counted; the rest of the order is
    /// still ingested.
    #[instrument(skip_all, fields(order_id = order.id, items = order.line_items.len()))]
    pub async fn ingest(&self, order: &Order) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();

        for item in &order.line_items {
            match self.ingest_item(order, item).await {
                Ok((job_id, true)) => {
                    outcome.inserted += 1;
                    outcome.job_ids.push(job_id);
                }
                Ok((job_id, false)) => {
                    debug!(line_item_id = item.id, job_id = %job_id, "Job already exists");
                    outcome.skipped += 1;
                    outcome.job_ids.push(job_id);
                }
                Err(err) => {
                    error!(line_item_id = item.id, error = %err, "Failed to ingest line item");
                    outcome.failed += 1;
                }
            }
        }

        info!(
            inserted = outcome.inserted,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "Order ingested"
        );
        outcome
    }

    async fn ingest_item(&self, order: &Order, item: &LineItem) -> Result<(Uuid, bool), StoreError> {
        let product_id = item.routing_product_id();
        let routing = self.routing.resolve_item(item);
        let annotations = Annotations::new(order, item);

        let target_kind = routing
            .as_ref()
            .map(|routing| TargetKind::from(routing.logic_type))
            .unwrap_or(TargetKind::Username);

        let target_value = match target_kind {
            TargetKind::Username => annotations.identifier().unwrap_or_default().to_string(),
            TargetKind::LinkSet => raw_link_annotation(&annotations),
        };

        let service_id = routing
            .as_ref()
            .and_then(|routing| routing.service_for_region(order.region.as_deref()));
        if service_id.is_none() {
            // Kept so operators can see the unconfigured product.
            tracing::warn!(product_id, line_item_id = item.id, "No service id for product");
        }

        let job = NewJob {
            order_id: order.id,
            line_item_id: item.id,
            product_id,
            target_kind,
            target_value,
            quantity: annotations.quantity_override().unwrap_or(item.quantity),
            multiplier: annotations.multiplier().unwrap_or(1),
            service_id,
            next_attempt_at: (Utc::now() + self.initial_delay).fixed_offset(),
        };

        self.jobs.insert_if_absent(job).await
    }

    /// Delete every job and rebuild from the confirmed order backlog.
    #[instrument(skip_all)]
    pub async fn reset(&self) -> Result<ResetReport, StoreError> {
        let deleted = self.jobs.delete_all().await?;

        let mut ingested = 0;
        for order in self.orders.backlog().await {
            ingested += self.ingest(&order).await.inserted;
        }

        info!(deleted, ingested, "Job store reset from order backlog");
        Ok(ResetReport { deleted, ingested })
    }
}
