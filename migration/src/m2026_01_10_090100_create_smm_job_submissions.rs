//! Migration to create the smm_job_submissions ledger.
//!
//! Each row records one accepted provider submission for a resolved target of
//! a job, so a retried link-set job only re-sends the targets that failed.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SmmJobSubmissions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SmmJobSubmissions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SmmJobSubmissions::JobId).uuid().not_null())
                    .col(
                        ColumnDef::new(SmmJobSubmissions::Ordinal)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SmmJobSubmissions::Target).text().not_null())
                    .col(
                        ColumnDef::new(SmmJobSubmissions::Quantity)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SmmJobSubmissions::ProviderJobId)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SmmJobSubmissions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_smm_job_submissions_job_id")
                            .from(SmmJobSubmissions::Table, SmmJobSubmissions::JobId)
                            .to(SmmJobs::Table, SmmJobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_smm_job_submissions_job_target")
                    .table(SmmJobSubmissions::Table)
                    .col(SmmJobSubmissions::JobId)
                    .col(SmmJobSubmissions::Ordinal)
                    .col(SmmJobSubmissions::Target)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_smm_job_submissions_job_target")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(SmmJobSubmissions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SmmJobSubmissions {
    Table,
    Id,
    JobId,
    Ordinal,
    Target,
    Quantity,
    ProviderJobId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum SmmJobs {
    Table,
    Id,
}
