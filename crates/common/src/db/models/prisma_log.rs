//! PRISMA log entity
//!
//! One row per (task, stage) holding running flow counts. Rows for past
//! stages are never rewritten; the current stage's row is appended-to
//! monotonically.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "prisma_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub task_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub stage: String,

    /// Records identified across all sources, pre-deduplication
    pub identified: i64,

    pub duplicates_removed: i64,

    pub screened: i64,

    pub excluded: i64,

    pub included: i64,

    /// Records awaiting a human decision at this stage
    pub pending: i64,

    /// Exclusion reason code to count, as JSONB
    #[sea_orm(column_type = "JsonBinary")]
    pub exclusion_reasons: serde_json::Value,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Exclusion reason counts decoded from JSONB. BTreeMap keeps the
    /// report ordering stable.
    pub fn reason_counts(&self) -> BTreeMap<String, i64> {
        serde_json::from_value(self.exclusion_reasons.clone()).unwrap_or_default()
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
}

impl Related<super::review_task::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReviewTask.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
