//! SmmJob entity model
//!
//! This module contains the SeaORM entity model for the smm_jobs table, one
//! durable unit of work mapping an order line item to a provider delivery.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// SmmJob entity; identity columns never change after insert
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "smm_jobs")]
pub struct Model {
    /// Store-assigned job identifier
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Host order this job was derived from
    pub order_id: i64,

    /// Line item within the order (unique together with `order_id`)
    pub line_item_id: i64,

    /// Product (or variation) the line item was purchased as
    pub product_id: i64,

    /// How `target_value` is interpreted (`username` or `link_set`)
    pub target_kind: String,

    /// Identifier, single link, or raw comma-separated link annotation
    pub target_value: String,

    /// Units ordered from the provider before any multiplier
    pub quantity: i64,

    /// Per-order multiplier captured at ingestion (applied to link-set splits)
    pub multiplier: i32,

    /// Provider-side service identifier resolved from product routing
    pub service_id: Option<String>,

    /// `pending` or `success`
    pub status: String,

    /// Delivery attempts consumed so far
    pub attempts: i32,

    /// Earliest time the job may be picked up again
    pub next_attempt_at: DateTimeWithTimeZone,

    /// Last diagnostic recorded for operators
    pub last_message: Option<String>,

    /// Provider order id(s), set on success
    pub provider_job_id: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::job_submission::Entity")]
    Submissions,
}

impl Related<super::job_submission::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Submissions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Persisted job states. Exhausted jobs stay `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Success,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Success => "success",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "success" => Some(JobStatus::Success),
            _ => None,
        }
    }
}

/// Interpretation of a job's target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// A single username or link, delivered as-is
    Username,
    /// Links discovered from order annotations, quantity split across them
    LinkSet,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Username => "username",
            TargetKind::LinkSet => "link_set",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "username" => Some(TargetKind::Username),
            "link_set" => Some(TargetKind::LinkSet),
            _ => None,
        }
    }
}

impl Model {
    pub fn target_kind(&self) -> TargetKind {
        TargetKind::parse(&self.target_kind).unwrap_or(TargetKind::Username)
    }

    pub fn is_exhausted(&self, max_attempts: i32) -> bool {
        self.status == JobStatus::Pending.as_str() && self.attempts >= max_attempts
    }
}
