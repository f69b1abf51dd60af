//! Migration to create the smm_jobs table.
//!
//! One row per (order, line item) forwarded to the SMM provider, carrying the
//! delivery target, the resolved provider service and retry bookkeeping.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SmmJobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SmmJobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SmmJobs::OrderId).big_integer().not_null())
                    .col(ColumnDef::new(SmmJobs::LineItemId).big_integer().not_null())
                    .col(ColumnDef::new(SmmJobs::ProductId).big_integer().not_null())
                    .col(
                        ColumnDef::new(SmmJobs::TargetKind)
                            .text()
                            .not_null()
                            .default("username"),
                    )
                    .col(ColumnDef::new(SmmJobs::TargetValue).text().not_null())
                    .col(ColumnDef::new(SmmJobs::Quantity).big_integer().not_null())
                    .col(
                        ColumnDef::new(SmmJobs::Multiplier)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(ColumnDef::new(SmmJobs::ServiceId).text().null())
                    .col(
                        ColumnDef::new(SmmJobs::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(SmmJobs::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SmmJobs::NextAttemptAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(SmmJobs::LastMessage).text().null())
                    .col(ColumnDef::new(SmmJobs::ProviderJobId).text().null())
                    .col(
                        ColumnDef::new(SmmJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SmmJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // At most one job per order line item
        manager
            .create_index(
                Index::create()
                    .name("idx_smm_jobs_order_line_item")
                    .table(SmmJobs::Table)
                    .col(SmmJobs::OrderId)
                    .col(SmmJobs::LineItemId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Eligibility scan: pending jobs due for delivery, oldest first
        manager
            .create_index(
                Index::create()
                    .name("idx_smm_jobs_status_next_attempt")
                    .table(SmmJobs::Table)
                    .col(SmmJobs::Status)
                    .col(SmmJobs::NextAttemptAt)
                    .col(SmmJobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_smm_jobs_status_next_attempt")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_smm_jobs_order_line_item").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(SmmJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SmmJobs {
    Table,
    Id,
    OrderId,
    LineItemId,
    ProductId,
    TargetKind,
    TargetValue,
    Quantity,
    Multiplier,
    ServiceId,
    Status,
    Attempts,
    NextAttemptAt,
    LastMessage,
    ProviderJobId,
    CreatedAt,
    UpdatedAt,
}
