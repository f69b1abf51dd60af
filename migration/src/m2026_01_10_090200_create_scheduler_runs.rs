//! Migration to create the scheduler_runs watermark table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SchedulerRuns::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SchedulerRuns::Name)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SchedulerRuns::LastRunAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SchedulerRuns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SchedulerRuns {
    Table,
    Name,
    LastRunAt,
}
