//! Provenance event entity
//!
//! Append-only audit record of every state-changing action. The sole
//! source of truth for audits; current-state tables are derived views
//! over this log. Retention may outlive task deletion, so this table
//! does not cascade with its task.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "provenance_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub task_id: Uuid,

    /// Entity kind the action touched, e.g. "study_record",
    /// "screening_decision", "workflow_state"
    #[sea_orm(column_type = "Text")]
    pub entity_type: String,

    pub entity_id: Uuid,

    /// Action name, e.g. "created", "merged", "decision_overridden",
    /// "stage_advanced"
    #[sea_orm(column_type = "Text")]
    pub action: String,

    /// Who or what performed the action
    #[sea_orm(column_type = "Text")]
    pub actor: String,

    /// Previous value snapshot, when the action replaced state
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub previous: Option<serde_json::Value>,

    /// New value snapshot
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub new: Option<serde_json::Value>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
