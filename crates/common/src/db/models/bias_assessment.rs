//! Bias assessment entity
//!
//! One structured quality score per included study under a named
//! appraisal tool.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-domain risk rating
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskRating {
    Low,
    SomeConcerns,
    High,
}

impl From<String> for RiskRating {
    fn from(s: String) -> Self {
        match s.as_str() {
            "low" => RiskRating::Low,
            "some_concerns" => RiskRating::SomeConcerns,
            "high" => RiskRating::High,
            _ => RiskRating::SomeConcerns,
        }
    }
}

impl From<RiskRating> for String {
    fn from(rating: RiskRating) -> Self {
        match rating {
            RiskRating::Low => "low",
            RiskRating::SomeConcerns => "some_concerns",
            RiskRating::High => "high",
        }
        .to_string()
    }
}

/// One appraised bias domain
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRating {
    pub domain: String,
    pub rating: RiskRating,
    pub rationale: String,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bias_assessments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub task_id: Uuid,

    pub record_id: Uuid,

    /// Appraisal tool name from the configured registry
    #[sea_orm(column_type = "Text")]
    pub tool: String,

    /// Per-domain ratings as a JSONB list of DomainRating
    #[sea_orm(column_type = "JsonBinary")]
    pub domain_ratings: serde_json::Value,

    /// Overall judgment (worst domain rating)
    #[sea_orm(column_type = "Text")]
    pub overall: String,

    /// Set when a later human override invalidates the screened include
    /// this assessment was computed under
    pub stale: bool,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn overall_rating(&self) -> RiskRating {
        RiskRating::from(self.overall.clone())
    }

    pub fn ratings(&self) -> Vec<DomainRating> {
        serde_json::from_value(self.domain_ratings.clone()).unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::review_task::Entity",
        from = "Column::TaskId",
        to = "super::review_task::Column::Id",
        on_delete = "Cascade"
    )]
    ReviewTask,

    #[sea_orm(
        belongs_to = "super::study_record::Entity",
        from = "Column::RecordId",
        to = "super::study_record::Column::Id"
    )]
    Record,
}

impl ActiveModelBehavior for ActiveModel {}
