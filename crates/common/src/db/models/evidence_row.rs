//! Evidence row entity
//!
//! Extracted outcome data for an included study. Multiple rows per study
//! are permitted (one per reported outcome).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "evidence_rows")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub task_id: Uuid,

    pub record_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub outcome_name: String,

    /// Effect measure, e.g. "mean_difference", "odds_ratio"
    #[sea_orm(column_type = "Text")]
    pub measure: String,

    /// Point estimate of the effect, when reported
    pub effect: Option<f64>,

    /// Variance of the effect estimate, when reported
    pub variance: Option<f64>,

    pub sample_size: i32,

    /// Group labels and sizes as a JSONB list of {label, n}
    #[sea_orm(column_type = "JsonBinary")]
    pub groups: serde_json::Value,

    /// Set when a later human override invalidates the screened include
    /// this row was extracted under
    pub stale: bool,

    pub created_at: DateTimeWithTimeZone,
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

impl Related<super::study_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Record.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
