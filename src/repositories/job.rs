//! # Job Repository
//!
//! Durable job store: idempotent inserts, eligibility selection, per-job
//! claims and retry bookkeeping over the `smm_jobs` table, plus the
//! submission ledger in `smm_job_submissions`.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::{StoreError, is_unique_violation};
use crate::models::job_submission;
use crate::models::smm_job::{ActiveModel, Column, Entity, JobStatus, Model, TargetKind};

/// Attempt cap and backoff applied by the store.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for RetryPolicy {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff: Duration::seconds(config.backoff_seconds as i64),
        }
    }
}

/// Fields for a job about to be ingested.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub order_id: i64,
    pub line_item_id: i64,
    pub product_id: i64,
    pub target_kind: TargetKind,
    pub target_value: String,
    pub quantity: i64,
    pub multiplier: i32,
    pub service_id: Option<String>,
    pub next_attempt_at: DateTime<FixedOffset>,
}

/// Filters for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub order_id: Option<i64>,
    /// `Some(true)`: only jobs that ran out of attempts; `Some(false)`: only live ones
    pub exhausted: Option<bool>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Aggregate job counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct JobCounts {
    pub pending: u64,
    pub success: u64,
    /// Pending jobs that will never be selected again
    pub exhausted: u64,
    pub total: u64,
}

#[derive(Clone)]
pub struct JobRepository {
    db: DatabaseConnection,
    policy: RetryPolicy,
}

fn now() -> DateTime<FixedOffset> {
    Utc::now().fixed_offset()
}

impl JobRepository {
    pub fn new(db: DatabaseConnection, policy: RetryPolicy) -> Self {
        Self { db, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Insert a job unless one already exists for `(order_id, line_item_id)`.
    ///
    /// Returns the job id and whether this call created it. A concurrent
    /// insert losing the unique index race reports `inserted = false`.
    pub async fn insert_if_absent(&self, job: NewJob) -> Result<(Uuid, bool), StoreError> {
        if let Some(existing) = self.find_by_line_item(job.order_id, job.line_item_id).await? {
            metrics::counter!("smm_jobs_duplicate_total").increment(1);
            return Ok((existing.id, false));
        }

        let created_at = now();
        let id = Uuid::new_v4();
        let model = ActiveModel {
            id: Set(id),
            order_id: Set(job.order_id),
            line_item_id: Set(job.line_item_id),
            product_id: Set(job.product_id),
            target_kind: Set(job.target_kind.as_str().to_string()),
            target_value: Set(job.target_value),
            quantity: Set(job.quantity),
            multiplier: Set(job.multiplier),
            service_id: Set(job.service_id),
            status: Set(JobStatus::Pending.as_str().to_string()),
            attempts: Set(0),
            next_attempt_at: Set(job.next_attempt_at),
            last_message: Set(None),
            provider_job_id: Set(None),
            created_at: Set(created_at),
            updated_at: Set(created_at),
        };

        match Entity::insert(model).exec(&self.db).await {
            Ok(_) => {
                metrics::counter!("smm_jobs_ingested_total").increment(1);
                tracing::info!(
                    job_id = %id,
                    order_id = job.order_id,
                    line_item_id = job.line_item_id,
                    "Job enqueued"
                );
                Ok((id, true))
            }
            Err(err) if is_unique_violation(&err) => {
                metrics::counter!("smm_jobs_duplicate_total").increment(1);
                let existing = self
                    .find_by_line_item(job.order_id, job.line_item_id)
                    .await?
                    .ok_or_else(|| StoreError::Database {
                        context: "insert_if_absent",
                        source: err,
                    })?;
                Ok((existing.id, false))
            }
            Err(err) => Err(StoreError::db("insert_if_absent")(err)),
        }
    }

    pub async fn find(&self, job_id: Uuid) -> Result<Option<Model>, StoreError> {
        Entity::find_by_id(job_id)
            .one(&self.db)
            .await
            .map_err(StoreError::db("find"))
    }

    pub async fn find_by_line_item(
        &self,
        order_id: i64,
        line_item_id: i64,
    ) -> Result<Option<Model>, StoreError> {
        Entity::find()
            .filter(Column::OrderId.eq(order_id))
            .filter(Column::LineItemId.eq(line_item_id))
            .one(&self.db)
            .await
            .map_err(StoreError::db("find_by_line_item"))
    }

    /// Pending jobs under the attempt cap whose backoff has elapsed, oldest first.
    pub async fn select_eligible(&self, limit: u64) -> Result<Vec<Model>, StoreError> {
        self.select_eligible_at(limit, now()).await
    }

    pub async fn select_eligible_at(
        &self,
        limit: u64,
        now: DateTime<FixedOffset>,
    ) -> Result<Vec<Model>, StoreError> {
        Entity::find()
            .filter(self.eligible_condition(now))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(StoreError::db("select_eligible"))
    }

    fn eligible_condition(&self, now: DateTime<FixedOffset>) -> Condition {
        Condition::all()
            .add(Column::Status.eq(JobStatus::Pending.as_str()))
            .add(Column::Attempts.lt(self.policy.max_attempts))
            .add(Column::NextAttemptAt.lte(now))
    }

    /// Take a lease on an eligible job by pushing `next_attempt_at` past
    /// `now + lease`. Only one caller can win for a given eligibility window.
    pub async fn claim(&self, job_id: Uuid, lease: Duration) -> Result<bool, StoreError> {
        self.claim_at(job_id, lease, now()).await
    }

    pub async fn claim_at(
        &self,
        job_id: Uuid,
        lease: Duration,
        now: DateTime<FixedOffset>,
    ) -> Result<bool, StoreError> {
        let result = Entity::update_many()
            .col_expr(Column::NextAttemptAt, Expr::value(now + lease))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(job_id))
            .filter(self.eligible_condition(now))
            .exec(&self.db)
            .await
            .map_err(StoreError::db("claim"))?;

        Ok(result.rows_affected == 1)
    }

    /// Push a claimed job's lease out to `now + lease`. Only pending jobs
    /// are touched; returns whether the job was still pending.
    pub async fn renew_lease(&self, job_id: Uuid, lease: Duration) -> Result<bool, StoreError> {
        self.renew_lease_at(job_id, lease, now()).await
    }

    pub async fn renew_lease_at(
        &self,
        job_id: Uuid,
        lease: Duration,
        now: DateTime<FixedOffset>,
    ) -> Result<bool, StoreError> {
        let result = Entity::update_many()
            .col_expr(Column::NextAttemptAt, Expr::value(now + lease))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Pending.as_str()))
            .exec(&self.db)
            .await
            .map_err(StoreError::db("renew_lease"))?;

        Ok(result.rows_affected == 1)
    }

    pub async fn mark_success(&self, job_id: Uuid, provider_job_id: &str) -> Result<(), StoreError> {
        let updated_at = now();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Success.as_str()))
            .col_expr(Column::ProviderJobId, Expr::value(provider_job_id))
            .col_expr(
                Column::LastMessage,
                Expr::value(format!("Delivered as provider order {provider_job_id}")),
            )
            .col_expr(Column::UpdatedAt, Expr::value(updated_at))
            .filter(Column::Id.eq(job_id))
            .exec(&self.db)
            .await
            .map_err(StoreError::db("mark_success"))?;

        if result.rows_affected == 0 {
            return Err(StoreError::JobNotFound(job_id));
        }

        tracing::info!(job_id = %job_id, provider_job_id, outcome = "success", "Job delivered");
        Ok(())
    }

    /// Record a failed attempt: attempts + 1, next try after the backoff.
    pub async fn mark_retry(&self, job_id: Uuid, message: &str) -> Result<(), StoreError> {
        self.mark_retry_at(job_id, message, now()).await
    }

    pub async fn mark_retry_at(
        &self,
        job_id: Uuid,
        message: &str,
        now: DateTime<FixedOffset>,
    ) -> Result<(), StoreError> {
        self.record_failure(job_id, message, now, "retry").await
    }

    /// Record a validation failure. Bookkeeping matches [`Self::mark_retry`];
    /// the job stays pending and stops once attempts run out.
    pub async fn mark_error(&self, job_id: Uuid, message: &str) -> Result<(), StoreError> {
        self.record_failure(job_id, message, now(), "error").await
    }

    async fn record_failure(
        &self,
        job_id: Uuid,
        message: &str,
        now: DateTime<FixedOffset>,
        outcome: &'static str,
    ) -> Result<(), StoreError> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Pending.as_str()))
            .col_expr(Column::Attempts, Expr::col(Column::Attempts).add(1))
            .col_expr(Column::NextAttemptAt, Expr::value(now + self.policy.backoff))
            .col_expr(Column::LastMessage, Expr::value(message))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Pending.as_str()))
            .exec(&self.db)
            .await
            .map_err(StoreError::db("record_failure"))?;

        if result.rows_affected == 0 {
            return Err(StoreError::JobNotFound(job_id));
        }

        tracing::warn!(job_id = %job_id, outcome, message, "Job attempt failed");
        Ok(())
    }

    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Model>, StoreError> {
        let mut query = Entity::find().order_by_desc(Column::CreatedAt);

        if let Some(status) = filter.status {
            query = query.filter(Column::Status.eq(status.as_str()));
        }

        if let Some(order_id) = filter.order_id {
            query = query.filter(Column::OrderId.eq(order_id));
        }

        match filter.exhausted {
            Some(true) => {
                query = query
                    .filter(Column::Status.eq(JobStatus::Pending.as_str()))
                    .filter(Column::Attempts.gte(self.policy.max_attempts));
            }
            Some(false) => {
                query = query.filter(
                    Condition::any()
                        .add(Column::Status.ne(JobStatus::Pending.as_str()))
                        .add(Column::Attempts.lt(self.policy.max_attempts)),
                );
            }
            None => {}
        }

        if let Some(limit) = filter.limit {
            query = query.offset(filter.offset.unwrap_or(0)).limit(limit);
        }

        query.all(&self.db).await.map_err(StoreError::db("list"))
    }

    pub async fn counts_by_status(&self) -> Result<JobCounts, StoreError> {
        let rows: Vec<(String, i64)> = Entity::find()
            .select_only()
            .column(Column::Status)
            .column_as(Expr::col(Column::Id).count(), "count")
            .group_by(Column::Status)
            .into_tuple()
            .all(&self.db)
            .await
            .map_err(StoreError::db("counts_by_status"))?;

        let mut counts = JobCounts::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match JobStatus::parse(&status) {
                Some(JobStatus::Pending) => counts.pending += count,
                Some(JobStatus::Success) => counts.success += count,
                None => {}
            }
            counts.total += count;
        }
        counts.exhausted = self.count_exhausted().await?;

        Ok(counts)
    }

    /// Pending jobs that reached the attempt cap.
    pub async fn count_exhausted(&self) -> Result<u64, StoreError> {
        Entity::find()
            .filter(Column::Status.eq(JobStatus::Pending.as_str()))
            .filter(Column::Attempts.gte(self.policy.max_attempts))
            .count(&self.db)
            .await
            .map_err(StoreError::db("count_exhausted"))
    }

    /// Remove every job and submission. Returns the number of jobs deleted.
    pub async fn delete_all(&self) -> Result<u64, StoreError> {
        job_submission::Entity::delete_many()
            .exec(&self.db)
            .await
            .map_err(StoreError::db("delete_all"))?;

        let result = Entity::delete_many()
            .exec(&self.db)
            .await
            .map_err(StoreError::db("delete_all"))?;

        tracing::warn!(deleted = result.rows_affected, "All jobs deleted");
        Ok(result.rows_affected)
    }

    /// Submissions already accepted by the provider for a job, by ordinal.
    pub async fn delivered_targets(
        &self,
        job_id: Uuid,
    ) -> Result<Vec<job_submission::Model>, StoreError> {
        job_submission::Entity::find()
            .filter(job_submission::Column::JobId.eq(job_id))
            .order_by_asc(job_submission::Column::Ordinal)
            .all(&self.db)
            .await
            .map_err(StoreError::db("delivered_targets"))
    }

    pub async fn record_submission(
        &self,
        job_id: Uuid,
        ordinal: i32,
        target: &str,
        quantity: i64,
        provider_job_id: &str,
    ) -> Result<(), StoreError> {
        let submission = job_submission::ActiveModel {
            id: Set(Uuid::new_v4()),
            job_id: Set(job_id),
            ordinal: Set(ordinal),
            target: Set(target.to_string()),
            quantity: Set(quantity),
            provider_job_id: Set(provider_job_id.to_string()),
            created_at: Set(now()),
        };

        match submission.insert(&self.db).await {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                tracing::debug!(job_id = %job_id, ordinal, "Submission already recorded");
                Ok(())
            }
            Err(err) => Err(StoreError::db("record_submission")(err)),
        }
    }
}
