//! Review task entity owning the per-task workflow state

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// The eight PRISMA stages, strictly ordered. A task never skips forward
/// without completing the previous stage's blocking conditions and never
/// moves backward except by explicit re-open.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrismaStage {
    ProtocolValidation,
    SearchExecution,
    Deduplication,
    TitleAbstractScreening,
    FullTextScreening,
    QualityAppraisal,
    EvidenceSynthesis,
    ReportGeneration,
}

impl PrismaStage {
    /// All stages in workflow order
    pub const ALL: [PrismaStage; 8] = [
        PrismaStage::ProtocolValidation,
        PrismaStage::SearchExecution,
        PrismaStage::Deduplication,
        PrismaStage::TitleAbstractScreening,
        PrismaStage::FullTextScreening,
        PrismaStage::QualityAppraisal,
        PrismaStage::EvidenceSynthesis,
        PrismaStage::ReportGeneration,
    ];

    /// Zero-based position in the workflow order
    pub fn order(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).unwrap_or(0)
    }

    /// The following stage, or None after report generation
    pub fn next(&self) -> Option<PrismaStage> {
        Self::ALL.get(self.order() + 1).copied()
    }
}

impl From<String> for PrismaStage {
    fn from(s: String) -> Self {
        match s.as_str() {
            "protocol_validation" => PrismaStage::ProtocolValidation,
            "search_execution" => PrismaStage::SearchExecution,
            "deduplication" => PrismaStage::Deduplication,
            "title_abstract_screening" => PrismaStage::TitleAbstractScreening,
            "full_text_screening" => PrismaStage::FullTextScreening,
            "quality_appraisal" => PrismaStage::QualityAppraisal,
            "evidence_synthesis" => PrismaStage::EvidenceSynthesis,
            "report_generation" => PrismaStage::ReportGeneration,
            _ => PrismaStage::ProtocolValidation,
        }
    }
}

impl From<PrismaStage> for String {
    fn from(stage: PrismaStage) -> Self {
        match stage {
            PrismaStage::ProtocolValidation => "protocol_validation",
            PrismaStage::SearchExecution => "search_execution",
            PrismaStage::Deduplication => "deduplication",
            PrismaStage::TitleAbstractScreening => "title_abstract_screening",
            PrismaStage::FullTextScreening => "full_text_screening",
            PrismaStage::QualityAppraisal => "quality_appraisal",
            PrismaStage::EvidenceSynthesis => "evidence_synthesis",
            PrismaStage::ReportGeneration => "report_generation",
        }
        .to_string()
    }
}

/// Workflow status. `Paused` (awaiting human review) is distinct from
/// `Failed`; `Failed` and `Cancelled` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses admit no further stage execution
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "running" => TaskStatus::Running,
            "paused" => TaskStatus::Paused,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            "cancelled" => TaskStatus::Cancelled,
            _ => TaskStatus::Running,
        }
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
        .to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "review_tasks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    /// Validated research plan (PICO/SPIDER fields + criteria) as JSONB
    #[sea_orm(column_type = "JsonBinary")]
    pub plan: serde_json::Value,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text")]
    pub current_stage: String,

    /// Stage-specific working data, keyed by stage name
    #[sea_orm(column_type = "JsonBinary")]
    pub stage_data: serde_json::Value,

    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Get the task status as an enum
    pub fn task_status(&self) -> TaskStatus {
        TaskStatus::from(self.status.clone())
    }

    /// Get the current PRISMA stage as an enum
    pub fn stage(&self) -> PrismaStage {
        PrismaStage::from(self.current_stage.clone())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::study_record::Entity")]
    StudyRecords,

    #[sea_orm(has_many = "super::prisma_log::Entity")]
    PrismaLogs,
}

impl Related<super::study_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StudyRecords.def()
    }
}

impl Related<super::prisma_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PrismaLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ordering_covers_all_eight() {
        let mut stage = PrismaStage::ProtocolValidation;
        let mut visited = vec![stage];
        while let Some(next) = stage.next() {
            visited.push(next);
            stage = next;
        }
        assert_eq!(visited, PrismaStage::ALL.to_vec());
        assert_eq!(stage, PrismaStage::ReportGeneration);
    }

    #[test]
    fn test_stage_roundtrip() {
        for stage in PrismaStage::ALL {
            let text: String = stage.into();
            assert_eq!(PrismaStage::from(text), stage);
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Paused.is_terminal());
    }
}
