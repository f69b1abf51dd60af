//! # Repository Layer
//!
//! Repositories wrapping SeaORM access to the job store tables.

pub mod job;
pub mod scheduler_run;

pub use job::{JobCounts, JobFilter, JobRepository, NewJob, RetryPolicy};
pub use scheduler_run::SchedulerRunRepository;
