//! JobSubmission entity model
//!
//! Ledger of provider submissions accepted for a job's resolved targets.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "smm_job_submissions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning job
    pub job_id: Uuid,

    /// Position of the target in the job's resolved target list
    pub ordinal: i32,

    /// Link or identifier that was submitted
    pub target: String,

    /// Quantity submitted for this target
    pub quantity: i64,

    /// Order id returned by the provider
    pub provider_job_id: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::smm_job::Entity",
        from = "Column::JobId",
        to = "super::smm_job::Column::Id"
    )]
    Job,
}

impl Related<super::smm_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Job.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
