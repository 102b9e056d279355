//! Study record entity
//!
//! One bibliographic item fetched from an external source. Records are
//! never physically deleted; superseded duplicates carry `duplicate_of`
//! pointing at the canonical survivor and are retained for audit.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "study_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub task_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    /// Author list as a JSONB string array
    #[sea_orm(column_type = "JsonBinary")]
    pub authors: serde_json::Value,

    pub year: Option<i32>,

    #[sea_orm(column_type = "Text", nullable)]
    pub doi: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub source: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub abstract_text: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub full_text_ref: Option<String>,

    /// SHA-256 over normalized title + first-author surname + year;
    /// unique per task
    #[sea_orm(column_type = "Text")]
    pub content_hash: String,

    /// Arbitrary source metadata as JSONB
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: serde_json::Value,

    /// Canonical record this one was merged into, when deduplicated
    pub duplicate_of: Option<Uuid>,

    pub ingested_at: DateTimeWithTimeZone,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    /// Author list decoded from JSONB
    pub fn author_list(&self) -> Vec<String> {
        serde_json::from_value(self.authors.clone()).unwrap_or_default()
    }

    /// Whether this record survived deduplication
    pub fn is_canonical(&self) -> bool {
        self.duplicate_of.is_none()
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

    #[sea_orm(has_many = "super::screening_decision::Entity")]
    ScreeningDecisions,

    #[sea_orm(has_many = "super::evidence_row::Entity")]
    EvidenceRows,
}

impl Related<super::review_task::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReviewTask.def()
    }
}

impl Related<super::screening_decision::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ScreeningDecisions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
