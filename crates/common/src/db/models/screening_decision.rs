//! Screening decision entity
//!
//! One decision per (record, stage) pair. Superseded rows are retained;
//! at most one row per pair has `superseded = false`. A human decision
//! always supersedes an automated one for the same pair.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Screening stage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningStage {
    TitleAbstract,
    FullText,
}

impl From<String> for ScreeningStage {
    fn from(s: String) -> Self {
        match s.as_str() {
            "title_abstract" => ScreeningStage::TitleAbstract,
            "full_text" => ScreeningStage::FullText,
            _ => ScreeningStage::TitleAbstract,
        }
    }
}

impl From<ScreeningStage> for String {
    fn from(stage: ScreeningStage) -> Self {
        match stage {
            ScreeningStage::TitleAbstract => "title_abstract",
            ScreeningStage::FullText => "full_text",
        }
        .to_string()
    }
}

/// Closed decision variant. Loose capability payloads are mapped into
/// this enum at the boundary; anything else is a contract violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Include,
    Exclude,
    Uncertain,
}

impl Decision {
    /// Strict parse used at the capability boundary; unknown strings are
    /// rejected, not coerced.
    pub fn parse_strict(s: &str) -> Option<Decision> {
        match s {
            "include" => Some(Decision::Include),
            "exclude" => Some(Decision::Exclude),
            "uncertain" => Some(Decision::Uncertain),
            _ => None,
        }
    }
}

impl From<String> for Decision {
    fn from(s: String) -> Self {
        Decision::parse_strict(&s).unwrap_or(Decision::Uncertain)
    }
}

impl From<Decision> for String {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Include => "include",
            Decision::Exclude => "exclude",
            Decision::Uncertain => "uncertain",
        }
        .to_string()
    }
}

/// Decision actor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Human,
    Automated,
}

impl From<String> for Actor {
    fn from(s: String) -> Self {
        match s.as_str() {
            "human" => Actor::Human,
            "automated" => Actor::Automated,
            _ => Actor::Automated,
        }
    }
}

impl From<Actor> for String {
    fn from(actor: Actor) -> Self {
        match actor {
            Actor::Human => "human",
            Actor::Automated => "automated",
        }
        .to_string()
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "screening_decisions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub task_id: Uuid,

    pub record_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub stage: String,

    #[sea_orm(column_type = "Text")]
    pub decision: String,

    /// Exclusion reason code from the configured vocabulary
    #[sea_orm(column_type = "Text", nullable)]
    pub reason_code: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub actor: String,

    /// Confidence in [0, 1]; 1.0 for human decisions
    pub confidence: f64,

    #[sea_orm(column_type = "Text")]
    pub rationale: String,

    /// Whether this decision requires human resolution before the task
    /// can advance past its stage
    pub review_required: bool,

    /// Superseded decisions are retained for audit
    pub superseded: bool,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn screening_stage(&self) -> ScreeningStage {
        ScreeningStage::from(self.stage.clone())
    }

    pub fn decision_value(&self) -> Decision {
        Decision::from(self.decision.clone())
    }

    pub fn decision_actor(&self) -> Actor {
        Actor::from(self.actor.clone())
    }

    /// Active decisions are the single non-superseded row per pair
    pub fn is_active(&self) -> bool {
        !self.superseded
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

impl Related<super::study_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Record.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_decision_parse_rejects_unknown() {
        assert_eq!(Decision::parse_strict("include"), Some(Decision::Include));
        assert_eq!(Decision::parse_strict("maybe"), None);
        assert_eq!(Decision::parse_strict("INCLUDE"), None);
    }

    #[test]
    fn test_stage_roundtrip() {
        for stage in [ScreeningStage::TitleAbstract, ScreeningStage::FullText] {
            let text: String = stage.into();
            assert_eq!(ScreeningStage::from(text), stage);
        }
    }
}
