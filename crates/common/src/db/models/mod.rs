//! SeaORM entity models
//!
//! Database entities for the RevForge workflow engine

mod bias_assessment;
mod duplicate_match;
mod evidence_row;
mod prisma_log;
mod provenance_event;
mod review_task;
mod screening_decision;
mod study_cluster;
mod study_record;

pub use review_task::{
    ActiveModel as ReviewTaskActiveModel,
    Column as ReviewTaskColumn,
    Entity as ReviewTaskEntity,
    Model as ReviewTask,
    PrismaStage,
    TaskStatus,
};

pub use study_record::{
    ActiveModel as StudyRecordActiveModel,
    Column as StudyRecordColumn,
    Entity as StudyRecordEntity,
    Model as StudyRecord,
};

pub use duplicate_match::{
    ActiveModel as DuplicateMatchActiveModel,
    Column as DuplicateMatchColumn,
    Entity as DuplicateMatchEntity,
    MatchStatus,
    MatchStrategy,
    Model as DuplicateMatch,
};

pub use study_cluster::{
    ActiveModel as StudyClusterActiveModel,
    Column as StudyClusterColumn,
    ClusterStrategy,
    Entity as StudyClusterEntity,
    Model as StudyCluster,
};

pub use screening_decision::{
    ActiveModel as ScreeningDecisionActiveModel,
    Actor,
    Column as ScreeningDecisionColumn,
    Decision,
    Entity as ScreeningDecisionEntity,
    Model as ScreeningDecision,
    ScreeningStage,
};

pub use bias_assessment::{
    ActiveModel as BiasAssessmentActiveModel,
    Column as BiasAssessmentColumn,
    DomainRating,
    Entity as BiasAssessmentEntity,
    Model as BiasAssessment,
    RiskRating,
};

pub use evidence_row::{
    ActiveModel as EvidenceRowActiveModel,
    Column as EvidenceRowColumn,
    Entity as EvidenceRowEntity,
    Model as EvidenceRow,
};

pub use prisma_log::{
    ActiveModel as PrismaLogActiveModel,
    Column as PrismaLogColumn,
    Entity as PrismaLogEntity,
    Model as PrismaLog,
};

pub use provenance_event::{
    ActiveModel as ProvenanceEventActiveModel,
    Column as ProvenanceEventColumn,
    Entity as ProvenanceEventEntity,
    Model as ProvenanceEvent,
};
