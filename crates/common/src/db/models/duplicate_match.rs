//! Duplicate match entity
//!
//! An ordered pair of study records judged to describe the same study,
//! with the strategy that produced the match and its confidence.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Match strategy, highest confidence first in the dedup ladder
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Doi,
    ContentHash,
    FuzzyTitle,
    Combined,
}

impl From<String> for MatchStrategy {
    fn from(s: String) -> Self {
        match s.as_str() {
            "doi" => MatchStrategy::Doi,
            "content_hash" => MatchStrategy::ContentHash,
            "fuzzy_title" => MatchStrategy::FuzzyTitle,
            "combined" => MatchStrategy::Combined,
            _ => MatchStrategy::Combined,
        }
    }
}

impl From<MatchStrategy> for String {
    fn from(strategy: MatchStrategy) -> Self {
        match strategy {
            MatchStrategy::Doi => "doi",
            MatchStrategy::ContentHash => "content_hash",
            MatchStrategy::FuzzyTitle => "fuzzy_title",
            MatchStrategy::Combined => "combined",
        }
        .to_string()
    }
}

/// Matches below the auto-merge confidence are routed to human review
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Merged,
    NeedsReview,
}

impl From<String> for MatchStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "merged" => MatchStatus::Merged,
            "needs_review" => MatchStatus::NeedsReview,
            _ => MatchStatus::NeedsReview,
        }
    }
}

impl From<MatchStatus> for String {
    fn from(status: MatchStatus) -> Self {
        match status {
            MatchStatus::Merged => "merged",
            MatchStatus::NeedsReview => "needs_review",
        }
        .to_string()
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "duplicate_matches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub task_id: Uuid,

    /// The record judged to be a duplicate
    pub record_id: Uuid,

    /// The canonical survivor it was matched against
    pub canonical_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub strategy: String,

    /// Match confidence in [0, 1]
    pub confidence: f64,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn match_strategy(&self) -> MatchStrategy {
        MatchStrategy::from(self.strategy.clone())
    }

    pub fn match_status(&self) -> MatchStatus {
        MatchStatus::from(self.status.clone())
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

    #[sea_orm(
        belongs_to = "super::study_record::Entity",
        from = "Column::CanonicalId",
        to = "super::study_record::Column::Id"
    )]
    CanonicalRecord,
}

impl ActiveModelBehavior for ActiveModel {}
