//! # Scheduler Run Repository
//!
//! Named "last run" watermarks shared by every trigger path and process.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use crate::error::{StoreError, is_unique_violation};
use crate::models::scheduler_run::{ActiveModel, Column, Entity};

#[derive(Clone)]
pub struct SchedulerRunRepository {
    db: DatabaseConnection,
}

impl SchedulerRunRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn last_run(&self, name: &str) -> Result<Option<DateTime<FixedOffset>>, StoreError> {
        Ok(Entity::find_by_id(name.to_string())
            .one(&self.db)
            .await
            .map_err(StoreError::db("last_run"))?
            .map(|run| run.last_run_at))
    }

    /// Advance the watermark to now if the previous run is at least
    /// `spacing` old. Returns whether this caller won the slot.
    pub async fn try_acquire(&self, name: &str, spacing: Duration) -> Result<bool, StoreError> {
        self.try_acquire_at(name, spacing, Utc::now().fixed_offset())
            .await
    }

    pub async fn try_acquire_at(
        &self,
        name: &str,
        spacing: Duration,
        now: DateTime<FixedOffset>,
    ) -> Result<bool, StoreError> {
        let result = Entity::update_many()
            .col_expr(Column::LastRunAt, Expr::value(now))
            .filter(Column::Name.eq(name))
            .filter(Column::LastRunAt.lte(now - spacing))
            .exec(&self.db)
            .await
            .map_err(StoreError::db("try_acquire"))?;

        if result.rows_affected == 1 {
            return Ok(true);
        }

        if self.last_run(name).await?.is_some() {
            return Ok(false);
        }

        self.insert(name, now).await
    }

    /// Set the watermark to now unconditionally.
    pub async fn touch(&self, name: &str) -> Result<(), StoreError> {
        self.touch_at(name, Utc::now().fixed_offset()).await
    }

    pub async fn touch_at(&self, name: &str, now: DateTime<FixedOffset>) -> Result<(), StoreError> {
        let result = Entity::update_many()
            .col_expr(Column::LastRunAt, Expr::value(now))
            .filter(Column::Name.eq(name))
            .exec(&self.db)
            .await
            .map_err(StoreError::db("touch"))?;

        if result.rows_affected == 0 && !self.insert(name, now).await? {
            // Lost the insert race; the other writer's timestamp is close enough.
            tracing::debug!(name, "Watermark created concurrently");
        }
        Ok(())
    }

    async fn insert(&self, name: &str, now: DateTime<FixedOffset>) -> Result<bool, StoreError> {
        let run = ActiveModel {
            name: Set(name.to_string()),
            last_run_at: Set(now),
        };

        match Entity::insert(run).exec(&self.db).await {
            Ok(_) => Ok(true),
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(StoreError::db("insert_watermark")(err)),
        }
    }
}
