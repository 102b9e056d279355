//! Study cluster entity
//!
//! Groups of related (non-duplicate) studies. Informational only; never
//! consulted by screening.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid as UuidValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStrategy {
    AuthorOverlap,
    TopicSimilarity,
    CitationNetwork,
}

impl From<String> for ClusterStrategy {
    fn from(s: String) -> Self {
        match s.as_str() {
            "author_overlap" => ClusterStrategy::AuthorOverlap,
            "topic_similarity" => ClusterStrategy::TopicSimilarity,
            "citation_network" => ClusterStrategy::CitationNetwork,
            _ => ClusterStrategy::TopicSimilarity,
        }
    }
}

impl From<ClusterStrategy> for String {
    fn from(strategy: ClusterStrategy) -> Self {
        match strategy {
            ClusterStrategy::AuthorOverlap => "author_overlap",
            ClusterStrategy::TopicSimilarity => "topic_similarity",
            ClusterStrategy::CitationNetwork => "citation_network",
        }
        .to_string()
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "study_clusters")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub task_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub strategy: String,

    /// Cohesion score in [0, 1]
    pub cohesion: f64,

    /// Member record ids as a JSONB uuid array
    #[sea_orm(column_type = "JsonBinary")]
    pub member_ids: serde_json::Value,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn cluster_strategy(&self) -> ClusterStrategy {
        ClusterStrategy::from(self.strategy.clone())
    }

    /// Member ids decoded from JSONB
    pub fn members(&self) -> Vec<UuidValue> {
        serde_json::from_value(self.member_ids.clone()).unwrap_or_default()
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

impl ActiveModelBehavior for ActiveModel {}
