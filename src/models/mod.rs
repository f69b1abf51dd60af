//! # Data Models
//!
//! SeaORM entities for the job store plus the service info payload.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod job_submission;
pub mod scheduler_run;
pub mod smm_job;

pub use job_submission::Entity as JobSubmission;
pub use scheduler_run::Entity as SchedulerRun;
pub use smm_job::Entity as SmmJob;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "smm-dispatch".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
