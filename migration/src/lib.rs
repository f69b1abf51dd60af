//! Database migrations for the SMM dispatch service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_01_10_090000_create_smm_jobs;
mod m2026_01_10_090100_create_smm_job_submissions;
mod m2026_01_10_090200_create_scheduler_runs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_10_090000_create_smm_jobs::Migration),
            Box::new(m2026_01_10_090100_create_smm_job_submissions::Migration),
            Box::new(m2026_01_10_090200_create_scheduler_runs::Migration),
        ]
    }
}
