//! Repository pattern for database operations
//!
//! Provides a clean interface for all data access operations
//! with proper error handling. Mutating operations write their
//! audit trail through `append_provenance`; current-state tables
//! are derived views over that log.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde_json::json;
use uuid::Uuid;

/// Filters for study listing
#[derive(Debug, Clone, Default)]
pub struct StudyFilter {
    /// Only canonical (non-duplicate) records
    pub canonical_only: bool,
    /// Restrict to records with an active decision at this stage
    pub stage: Option<ScreeningStage>,
    /// Restrict to records with this active decision value
    pub decision: Option<Decision>,
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Review Task Operations
    // ========================================================================

    /// Create a new review task in `protocol_validation`
    pub async fn create_task(&self, title: String, plan: serde_json::Value) -> Result<ReviewTask> {
        let now = Utc::now();

        let task = ReviewTaskActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(title),
            plan: Set(plan),
            status: Set(TaskStatus::Running.into()),
            current_stage: Set(PrismaStage::ProtocolValidation.into()),
            stage_data: Set(json!({})),
            last_error: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        task.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Find a review task by ID
    pub async fn find_task(&self, id: Uuid) -> Result<Option<ReviewTask>> {
        ReviewTaskEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Find a review task by ID, erroring when absent
    pub async fn require_task(&self, id: Uuid) -> Result<ReviewTask> {
        self.find_task(id)
            .await?
            .ok_or_else(|| AppError::TaskNotFound { id: id.to_string() })
    }

    /// Persist a task's workflow state
    pub async fn update_task_state(
        &self,
        task: &ReviewTask,
        status: TaskStatus,
        stage: PrismaStage,
        stage_data: serde_json::Value,
        last_error: Option<String>,
    ) -> Result<ReviewTask> {
        let mut active: ReviewTaskActiveModel = task.clone().into();
        active.status = Set(status.into());
        active.current_stage = Set(stage.into());
        active.stage_data = Set(stage_data);
        active.last_error = Set(last_error);
        active.updated_at = Set(Utc::now().into());

        active.update(self.write_conn()).await.map_err(Into::into)
    }

    // ========================================================================
    // Study Record Operations
    // ========================================================================

    /// Insert fetched records, skipping any whose content hash or DOI is
    /// already identified for this task. Returns (inserted, skipped).
    pub async fn insert_study_records(
        &self,
        task_id: Uuid,
        records: Vec<StudyRecordActiveModel>,
    ) -> Result<(Vec<StudyRecord>, u64)> {
        let existing = self.list_study_records(task_id, &StudyFilter::default()).await?;
        let mut seen_hashes: std::collections::HashSet<String> =
            existing.iter().map(|r| r.content_hash.clone()).collect();
        let mut seen_dois: std::collections::HashSet<String> =
            existing.iter().filter_map(|r| r.doi.clone()).collect();

        let mut inserted = Vec::new();
        let mut skipped = 0u64;

        for record in records {
            let hash = match &record.content_hash {
                ActiveValue::Set(h) => h.clone(),
                _ => continue,
            };
            let doi = match &record.doi {
                ActiveValue::Set(Some(d)) => Some(d.clone()),
                _ => None,
            };

            let hash_collision = !seen_hashes.insert(hash);
            let doi_collision = doi
                .map(|d| !seen_dois.insert(d))
                .unwrap_or(false);

            if hash_collision || doi_collision {
                skipped += 1;
                continue;
            }

            inserted.push(record.insert(self.write_conn()).await?);
        }

        Ok((inserted, skipped))
    }

    /// Find a study record by ID
    pub async fn find_record(&self, id: Uuid) -> Result<Option<StudyRecord>> {
        StudyRecordEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Find a study record by ID, erroring when absent
    pub async fn require_record(&self, id: Uuid) -> Result<StudyRecord> {
        self.find_record(id)
            .await?
            .ok_or_else(|| AppError::RecordNotFound { id: id.to_string() })
    }

    /// List study records for a task, deterministically ordered by
    /// ingestion time then id
    pub async fn list_study_records(
        &self,
        task_id: Uuid,
        filter: &StudyFilter,
    ) -> Result<Vec<StudyRecord>> {
        let mut query = StudyRecordEntity::find()
            .filter(StudyRecordColumn::TaskId.eq(task_id))
            .order_by_asc(StudyRecordColumn::IngestedAt)
            .order_by_asc(StudyRecordColumn::Id);

        if filter.canonical_only {
            query = query.filter(StudyRecordColumn::DuplicateOf.is_null());
        }

        let records = query.all(self.read_conn()).await?;

        // Decision filters need the decisions table; join in memory to
        // keep the query simple
        if filter.stage.is_none() && filter.decision.is_none() {
            return Ok(records);
        }

        let decisions = self
            .active_decisions(task_id, filter.stage)
            .await?;

        let matching: std::collections::HashSet<Uuid> = decisions
            .iter()
            .filter(|d| {
                filter
                    .decision
                    .map(|want| d.decision_value() == want)
                    .unwrap_or(true)
            })
            .map(|d| d.record_id)
            .collect();

        Ok(records
            .into_iter()
            .filter(|r| matching.contains(&r.id))
            .collect())
    }

    /// Mark a record as a duplicate of a canonical survivor
    pub async fn mark_duplicate(&self, record: &StudyRecord, canonical_id: Uuid) -> Result<()> {
        let mut active: StudyRecordActiveModel = record.clone().into();
        active.duplicate_of = Set(Some(canonical_id));
        active.update(self.write_conn()).await?;
        Ok(())
    }

    // ========================================================================
    // Duplicate Match Operations
    // ========================================================================

    /// Record a confidence-scored duplicate match
    pub async fn insert_duplicate_match(
        &self,
        task_id: Uuid,
        record_id: Uuid,
        canonical_id: Uuid,
        strategy: MatchStrategy,
        confidence: f64,
        status: MatchStatus,
    ) -> Result<DuplicateMatch> {
        let m = DuplicateMatchActiveModel {
            id: Set(Uuid::new_v4()),
            task_id: Set(task_id),
            record_id: Set(record_id),
            canonical_id: Set(canonical_id),
            strategy: Set(strategy.into()),
            confidence: Set(confidence),
            status: Set(status.into()),
            created_at: Set(Utc::now().into()),
        };

        m.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// List duplicate matches for a task
    pub async fn list_duplicate_matches(&self, task_id: Uuid) -> Result<Vec<DuplicateMatch>> {
        DuplicateMatchEntity::find()
            .filter(DuplicateMatchColumn::TaskId.eq(task_id))
            .order_by_asc(DuplicateMatchColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Cluster Operations
    // ========================================================================

    /// Insert a study cluster
    pub async fn insert_cluster(
        &self,
        task_id: Uuid,
        strategy: ClusterStrategy,
        cohesion: f64,
        member_ids: &[Uuid],
    ) -> Result<StudyCluster> {
        let cluster = StudyClusterActiveModel {
            id: Set(Uuid::new_v4()),
            task_id: Set(task_id),
            strategy: Set(strategy.into()),
            cohesion: Set(cohesion),
            member_ids: Set(json!(member_ids)),
            created_at: Set(Utc::now().into()),
        };

        cluster.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// List clusters for a task
    pub async fn list_clusters(&self, task_id: Uuid) -> Result<Vec<StudyCluster>> {
        StudyClusterEntity::find()
            .filter(StudyClusterColumn::TaskId.eq(task_id))
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Screening Decision Operations
    // ========================================================================

    /// Insert a screening decision
    pub async fn insert_decision(
        &self,
        decision: ScreeningDecisionActiveModel,
    ) -> Result<ScreeningDecision> {
        decision.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// The single active (non-superseded) decision for a (record, stage)
    /// pair, if any
    pub async fn find_active_decision(
        &self,
        record_id: Uuid,
        stage: ScreeningStage,
    ) -> Result<Option<ScreeningDecision>> {
        ScreeningDecisionEntity::find()
            .filter(ScreeningDecisionColumn::RecordId.eq(record_id))
            .filter(ScreeningDecisionColumn::Stage.eq(String::from(stage)))
            .filter(ScreeningDecisionColumn::Superseded.eq(false))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Active decisions for a task, optionally restricted to one stage
    pub async fn active_decisions(
        &self,
        task_id: Uuid,
        stage: Option<ScreeningStage>,
    ) -> Result<Vec<ScreeningDecision>> {
        let mut query = ScreeningDecisionEntity::find()
            .filter(ScreeningDecisionColumn::TaskId.eq(task_id))
            .filter(ScreeningDecisionColumn::Superseded.eq(false))
            .order_by_asc(ScreeningDecisionColumn::CreatedAt);

        if let Some(stage) = stage {
            query = query.filter(ScreeningDecisionColumn::Stage.eq(String::from(stage)));
        }

        query.all(self.read_conn()).await.map_err(Into::into)
    }

    /// Mark a decision superseded, retaining it for audit
    pub async fn supersede_decision(&self, decision: &ScreeningDecision) -> Result<()> {
        let mut active: ScreeningDecisionActiveModel = decision.clone().into();
        active.superseded = Set(true);
        active.update(self.write_conn()).await?;
        Ok(())
    }

    /// Count active decisions still requiring human review at a stage
    pub async fn count_review_required(
        &self,
        task_id: Uuid,
        stage: ScreeningStage,
    ) -> Result<u64> {
        use sea_orm::PaginatorTrait;

        ScreeningDecisionEntity::find()
            .filter(ScreeningDecisionColumn::TaskId.eq(task_id))
            .filter(ScreeningDecisionColumn::Stage.eq(String::from(stage)))
            .filter(ScreeningDecisionColumn::Superseded.eq(false))
            .filter(ScreeningDecisionColumn::ReviewRequired.eq(true))
            .count(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Bias Assessment Operations
    // ========================================================================

    /// Insert a bias assessment
    pub async fn insert_assessment(
        &self,
        assessment: BiasAssessmentActiveModel,
    ) -> Result<BiasAssessment> {
        assessment.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// List assessments for a task
    pub async fn list_assessments(&self, task_id: Uuid) -> Result<Vec<BiasAssessment>> {
        BiasAssessmentEntity::find()
            .filter(BiasAssessmentColumn::TaskId.eq(task_id))
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Mark a record's downstream assessments stale after a human
    /// override reversed its include decision
    pub async fn mark_assessments_stale(&self, record_id: Uuid) -> Result<u64> {
        let assessments = BiasAssessmentEntity::find()
            .filter(BiasAssessmentColumn::RecordId.eq(record_id))
            .filter(BiasAssessmentColumn::Stale.eq(false))
            .all(self.read_conn())
            .await?;

        let count = assessments.len() as u64;
        for assessment in assessments {
            let mut active: BiasAssessmentActiveModel = assessment.into();
            active.stale = Set(true);
            active.update(self.write_conn()).await?;
        }

        Ok(count)
    }

    // ========================================================================
    // Evidence Row Operations
    // ========================================================================

    /// Insert an evidence row
    pub async fn insert_evidence_row(&self, row: EvidenceRowActiveModel) -> Result<EvidenceRow> {
        row.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// List non-stale evidence rows for a task
    pub async fn list_evidence_rows(&self, task_id: Uuid) -> Result<Vec<EvidenceRow>> {
        EvidenceRowEntity::find()
            .filter(EvidenceRowColumn::TaskId.eq(task_id))
            .filter(EvidenceRowColumn::Stale.eq(false))
            .order_by_asc(EvidenceRowColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Mark a record's evidence rows stale after a human override
    pub async fn mark_evidence_stale(&self, record_id: Uuid) -> Result<u64> {
        let rows = EvidenceRowEntity::find()
            .filter(EvidenceRowColumn::RecordId.eq(record_id))
            .filter(EvidenceRowColumn::Stale.eq(false))
            .all(self.read_conn())
            .await?;

        let count = rows.len() as u64;
        for row in rows {
            let mut active: EvidenceRowActiveModel = row.into();
            active.stale = Set(true);
            active.update(self.write_conn()).await?;
        }

        Ok(count)
    }

    // ========================================================================
    // PRISMA Log Operations
    // ========================================================================

    /// Get the PRISMA row for a (task, stage), if recorded
    pub async fn find_prisma_log(
        &self,
        task_id: Uuid,
        stage: PrismaStage,
    ) -> Result<Option<PrismaLog>> {
        PrismaLogEntity::find()
            .filter(PrismaLogColumn::TaskId.eq(task_id))
            .filter(PrismaLogColumn::Stage.eq(String::from(stage)))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// All PRISMA rows for a task in stage order
    pub async fn list_prisma_logs(&self, task_id: Uuid) -> Result<Vec<PrismaLog>> {
        let mut logs = PrismaLogEntity::find()
            .filter(PrismaLogColumn::TaskId.eq(task_id))
            .all(self.read_conn())
            .await?;

        logs.sort_by_key(|l| PrismaStage::from(l.stage.clone()).order());
        Ok(logs)
    }

    /// Upsert the current stage's PRISMA row. Counts only grow: a
    /// re-read of a completed stage never shrinks a counter.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_prisma_log(
        &self,
        task_id: Uuid,
        stage: PrismaStage,
        identified: i64,
        duplicates_removed: i64,
        screened: i64,
        excluded: i64,
        included: i64,
        pending: i64,
        exclusion_reasons: serde_json::Value,
    ) -> Result<PrismaLog> {
        let now = Utc::now();

        match self.find_prisma_log(task_id, stage).await? {
            Some(existing) => {
                let mut active: PrismaLogActiveModel = existing.clone().into();
                active.identified = Set(existing.identified.max(identified));
                active.duplicates_removed =
                    Set(existing.duplicates_removed.max(duplicates_removed));
                active.screened = Set(existing.screened.max(screened));
                active.excluded = Set(existing.excluded.max(excluded));
                active.included = Set(existing.included.max(included));
                active.pending = Set(pending);
                active.exclusion_reasons = Set(exclusion_reasons);
                active.updated_at = Set(now.into());
                active.update(self.write_conn()).await.map_err(Into::into)
            }
            None => {
                let log = PrismaLogActiveModel {
                    id: Set(Uuid::new_v4()),
                    task_id: Set(task_id),
                    stage: Set(stage.into()),
                    identified: Set(identified),
                    duplicates_removed: Set(duplicates_removed),
                    screened: Set(screened),
                    excluded: Set(excluded),
                    included: Set(included),
                    pending: Set(pending),
                    exclusion_reasons: Set(exclusion_reasons),
                    created_at: Set(now.into()),
                    updated_at: Set(now.into()),
                };
                log.insert(self.write_conn()).await.map_err(Into::into)
            }
        }
    }

    // ========================================================================
    // Provenance Operations
    // ========================================================================

    /// Append an audit event. Events are never updated or deleted.
    pub async fn append_provenance(
        &self,
        task_id: Uuid,
        entity_type: &str,
        entity_id: Uuid,
        action: &str,
        actor: &str,
        previous: Option<serde_json::Value>,
        new: Option<serde_json::Value>,
    ) -> Result<ProvenanceEvent> {
        let event = ProvenanceEventActiveModel {
            id: Set(Uuid::new_v4()),
            task_id: Set(task_id),
            entity_type: Set(entity_type.to_string()),
            entity_id: Set(entity_id),
            action: Set(action.to_string()),
            actor: Set(actor.to_string()),
            previous: Set(previous),
            new: Set(new),
            created_at: Set(Utc::now().into()),
        };

        event.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Full audit trail for a task, oldest first
    pub async fn list_provenance(&self, task_id: Uuid) -> Result<Vec<ProvenanceEvent>> {
        ProvenanceEventEntity::find()
            .filter(ProvenanceEventColumn::TaskId.eq(task_id))
            .order_by_asc(ProvenanceEventColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }
}
