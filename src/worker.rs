//! # Retry Worker
//!
//! Pulls a bounded batch of eligible jobs, delivers each one through the
//! provider client and records the outcome. Jobs are processed one at a
//! time with a short pause in between; a failing job never aborts the
//! batch.

use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;

use crate::client::{ProviderResponse, ProviderSettings, SmmClient, Transport};
use crate::config::{ConfigProvider, WorkerConfig};
use crate::distributor::resolve_targets;
use crate::error::{DeliveryError, StoreError, truncate};
use crate::models::smm_job::Model as Job;
use crate::orders::{Annotations, OrderSource};
use crate::repositories::JobRepository;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepReport {
    /// Jobs claimed and attempted
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Eligible jobs another worker claimed first
    pub skipped: usize,
}

pub struct RetryWorker {
    jobs: JobRepository,
    orders: Arc<dyn OrderSource>,
    provider_config: Arc<dyn ConfigProvider>,
    config: WorkerConfig,
    host_transport: Option<Arc<dyn Transport>>,
    transport_chain: Option<Vec<Arc<dyn Transport>>>,
}

impl RetryWorker {
    pub fn new(
        jobs: JobRepository,
        orders: Arc<dyn OrderSource>,
        provider_config: Arc<dyn ConfigProvider>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            jobs,
            orders,
            provider_config,
            config,
            host_transport: None,
            transport_chain: None,
        }
    }

    /// Append the host application's HTTP transport as the last fallback.
    pub fn with_host_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.host_transport = Some(transport);
        self
    }

    /// Replace the built-in transport chain entirely.
    pub fn with_transport_chain(mut self, chain: Vec<Arc<dyn Transport>>) -> Self {
        self.transport_chain = Some(chain);
        self
    }

    fn lease(&self) -> Duration {
        Duration::seconds(self.config.claim_lease_seconds as i64)
    }

    fn client(&self, settings: ProviderSettings) -> Result<SmmClient, crate::client::ClientError> {
        match &self.transport_chain {
            Some(chain) => Ok(SmmClient::with_transports(settings, chain.clone())),
            None => SmmClient::new(settings, self.host_transport.clone()),
        }
    }

    /// Run one sweep over eligible jobs.
    ///
    /// Provider settings are read once here; without an endpoint and key
    /// the sweep does nothing and no attempts are consumed.
    #[instrument(skip_all, fields(batch_size = self.config.batch_size))]
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let started = Instant::now();
        let mut report = SweepReport::default();

        let client = match ProviderSettings::resolve(self.provider_config.as_ref())
            .and_then(|settings| self.client(settings))
        {
            Ok(client) => client,
            Err(err) => {
                warn!(error = %err, "Provider unavailable; skipping sweep");
                return Ok(report);
            }
        };

        let jobs = self.jobs.select_eligible(self.config.batch_size).await?;
        if jobs.is_empty() {
            debug!("No eligible jobs");
        }

        let lease = self.lease();
        let pause = std::time::Duration::from_millis(self.config.inter_job_delay_ms);

        for (index, job) in jobs.iter().enumerate() {
            if index > 0 && !pause.is_zero() {
                sleep(pause).await;
            }

            match self.jobs.claim(job.id, lease).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(job_id = %job.id, "Job claimed elsewhere");
                    report.skipped += 1;
                    continue;
                }
                Err(err) => {
                    error!(job_id = %job.id, error = %err, "Failed to claim job");
                    report.skipped += 1;
                    continue;
                }
            }

            report.processed += 1;
            if self.process(&client, job).await {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
        }

        match self.jobs.count_exhausted().await {
            Ok(exhausted) => gauge!("smm_jobs_exhausted").set(exhausted as f64),
            Err(err) => warn!(error = %err, "Could not count exhausted jobs"),
        }
        histogram!("smm_sweep_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);

        info!(
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Sweep finished"
        );
        Ok(report)
    }

    /// Deliver one claimed job and record the outcome. Returns whether it succeeded.
    #[instrument(skip_all, fields(job_id = %job.id, order_id = job.order_id, attempts = job.attempts))]
    async fn process(&self, client: &SmmClient, job: &Job) -> bool {
        match self.deliver(client, job).await {
            Ok(provider_job_id) => match self.jobs.mark_success(job.id, &provider_job_id).await {
                Ok(()) => {
                    counter!("smm_deliveries_total", "outcome" => "success").increment(1);
                    true
                }
                Err(err) => {
                    error!(error = %err, provider_job_id = %provider_job_id, "Delivered but could not mark job");
                    counter!("smm_deliveries_total", "outcome" => "store").increment(1);
                    false
                }
            },
            Err(err) => {
                counter!("smm_deliveries_total", "outcome" => err.kind()).increment(1);
                let message = err.to_string();
                let recorded = match err {
                    DeliveryError::Validation(_) => self.jobs.mark_error(job.id, &message).await,
                    _ => self.jobs.mark_retry(job.id, &message).await,
                };
                if let Err(store_err) = recorded {
                    error!(error = %store_err, "Failed to record delivery failure");
                }
                false
            }
        }
    }

    async fn deliver(&self, client: &SmmClient, job: &Job) -> Result<String, DeliveryError> {
        let service_id = job
            .service_id
            .clone()
            .filter(|service| !service.trim().is_empty())
            .or_else(|| client.settings().default_service_id.clone())
            .ok_or_else(|| {
                DeliveryError::Validation(format!(
                    "no service id configured for product {}",
                    job.product_id
                ))
            })?;
        if service_id.parse::<u64>().is_err() {
            return Err(DeliveryError::Validation(format!(
                "service id '{service_id}' is not numeric"
            )));
        }

        let order = self.orders.fetch_order(job.order_id).await;
        let annotations = order.as_ref().and_then(|order| {
            order
                .line_item(job.line_item_id)
                .map(|item| Annotations::new(order, item))
        });

        let targets = resolve_targets(job, annotations.as_ref())?;
        let drip_feed = annotations
            .map(|annotations| annotations.drip_feed())
            .unwrap_or_default();

        let delivered = self.jobs.delivered_targets(job.id).await?;
        let mut provider_ids = Vec::with_capacity(targets.len());

        for (ordinal, target) in targets.iter().enumerate() {
            let ordinal = ordinal as i32;

            if let Some(done) = delivered
                .iter()
                .find(|s| s.ordinal == ordinal && s.target == target.target)
            {
                debug!(ordinal, target = %target.target, "Target already delivered");
                provider_ids.push(done.provider_job_id.clone());
                continue;
            }

            let response = client
                .submit_order(&service_id, &target.target, target.quantity, &drip_feed)
                .await?;

            match response {
                ProviderResponse::Success { order_id } => {
                    debug!(
                        ordinal,
                        target = %target.target,
                        kind = target.kind.map(|k| k.as_str()),
                        quantity = target.quantity,
                        provider_job_id = %order_id,
                        "Target delivered"
                    );
                    self.jobs
                        .record_submission(job.id, ordinal, &target.target, target.quantity, &order_id)
                        .await?;
                    self.jobs.renew_lease(job.id, self.lease()).await?;
                    provider_ids.push(order_id);
                }
                ProviderResponse::Failure { message } => {
                    return Err(DeliveryError::ProviderRejection(message));
                }
                ProviderResponse::Malformed { raw } => {
                    return Err(DeliveryError::UnexpectedResponse(truncate(&raw, 200)));
                }
            }
        }

        Ok(provider_ids.join(","))
    }
}
