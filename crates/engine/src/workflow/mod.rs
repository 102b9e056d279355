//! Workflow orchestrator
//!
//! Drives a review task through the eight PRISMA stages in strict
//! order. Each stage transition executes the corresponding component,
//! updates the stage's PRISMA counts, appends a provenance event,
//! persists the workflow state, and only then advances.
//!
//! A per-task lock serializes advancement for a given task id while
//! independent tasks run fully in parallel. Human-review blocking is a
//! persisted `paused` status, not a suspended thread: a later `advance`
//! call resumes from the persisted state and reproduces the same
//! pending set.

mod plan;

pub use plan::ResearchPlan;

use crate::appraisal::ToolRegistry;
use crate::cluster::{cluster_records, ClusterThresholds};
use crate::dedup::deduplicate;
use crate::screening::{
    self, decision_row, outcome_from, reduce_counts, screen_records, StageCounts,
};
use crate::source::{draft_record, SourceGateway};
use crate::synthesis::synthesize;
use chrono::Utc;
use revforge_common::capabilities::{DecisionCapability, ExtractionCapability};
use revforge_common::config::{AppConfig, SourceConfig};
use revforge_common::db::models::{
    BiasAssessmentActiveModel, Decision, EvidenceRowActiveModel, MatchStatus, PrismaStage,
    ReviewTask, ScreeningStage, StudyRecord, TaskStatus,
};
use revforge_common::db::{Repository, StudyFilter};
use revforge_common::errors::{AppError, Result};
use revforge_common::metrics;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Per-task serialization locks: one advancement in flight per task id
#[derive(Default)]
pub struct TaskLocks {
    inner: std::sync::Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl TaskLocks {
    pub async fn acquire(&self, task_id: Uuid) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().expect("task lock map poisoned");
            map.entry(task_id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Result of one `advance` call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    /// The stage completed and the task moved forward
    Advanced { from: PrismaStage, to: PrismaStage },
    /// The stage has unresolved human-review records; the task is
    /// paused, not failed
    Paused {
        stage: PrismaStage,
        pending_review: u64,
    },
    /// All configured sources failed or another unrecoverable component
    /// error occurred; the task is terminally failed with prior PRISMA
    /// rows intact
    Failed { stage: PrismaStage, error: String },
    /// Report generation finished; the task is complete
    Completed,
}

/// Summary of a task's workflow state for callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: Uuid,
    pub title: String,
    pub status: TaskStatus,
    pub current_stage: PrismaStage,
    pub pending_review: u64,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// The workflow orchestrator
pub struct Orchestrator {
    repo: Repository,
    config: Arc<AppConfig>,
    gateway: SourceGateway,
    decision: Arc<dyn DecisionCapability>,
    extraction: Arc<dyn ExtractionCapability>,
    tools: ToolRegistry,
    locks: TaskLocks,
}

impl Orchestrator {
    pub fn new(
        repo: Repository,
        config: Arc<AppConfig>,
        gateway: SourceGateway,
        decision: Arc<dyn DecisionCapability>,
        extraction: Arc<dyn ExtractionCapability>,
        tools: ToolRegistry,
    ) -> Self {
        Self {
            repo,
            config,
            gateway,
            decision,
            extraction,
            tools,
            locks: TaskLocks::default(),
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Create a review task. The plan and the configured appraisal
    /// tools are validated here; a failing plan never creates a task or
    /// a study record. An optional per-task source configuration
    /// overrides the service-level one for this task's search stage.
    #[instrument(skip(self, plan, sources))]
    pub async fn create_task(
        &self,
        title: String,
        plan: ResearchPlan,
        sources: Option<Vec<SourceConfig>>,
    ) -> Result<ReviewTask> {
        plan.validate()?;
        self.tools.validate_names(&self.config.appraisal.tools)?;
        if let Some(ref overrides) = sources {
            if !overrides.iter().any(|s| s.enabled) {
                return Err(AppError::Validation {
                    message: "task source configuration enables no sources".to_string(),
                    field: Some("sources".to_string()),
                });
            }
        }

        let mut task = self.repo.create_task(title, json!(plan)).await?;
        if let Some(overrides) = sources {
            let mut stage_data = task.stage_data.clone();
            stage_data["source_config"] = json!(overrides);
            task = self
                .repo
                .update_task_state(&task, task.task_status(), task.stage(), stage_data, None)
                .await?;
        }
        self.repo
            .append_provenance(
                task.id,
                "workflow_state",
                task.id,
                "task_created",
                "system",
                None,
                Some(json!({ "stage": task.current_stage, "status": task.status })),
            )
            .await?;

        info!(task_id = %task.id, "Review task created");
        Ok(task)
    }

    /// Execute the task's current stage and advance when its blocking
    /// conditions are met. Safe to call again after a pause, an error,
    /// or a process restart.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn advance(&self, task_id: Uuid) -> Result<AdvanceOutcome> {
        let _guard = self.locks.acquire(task_id).await;

        let task = self.repo.require_task(task_id).await?;
        let status = task.task_status();
        if status.is_terminal() {
            return Err(AppError::WorkflowState {
                message: format!("task {} is {}", task_id, String::from(status)),
            });
        }

        let stage = task.stage();
        let started = Instant::now();

        let outcome = match stage {
            PrismaStage::ProtocolValidation => self.run_protocol_validation(&task).await,
            PrismaStage::SearchExecution => self.run_search(&task).await,
            PrismaStage::Deduplication => self.run_deduplication(&task).await,
            PrismaStage::TitleAbstractScreening => {
                self.run_screening(&task, ScreeningStage::TitleAbstract).await
            }
            PrismaStage::FullTextScreening => {
                self.run_screening(&task, ScreeningStage::FullText).await
            }
            PrismaStage::QualityAppraisal => self.run_appraisal(&task).await,
            PrismaStage::EvidenceSynthesis => self.run_synthesis(&task).await,
            PrismaStage::ReportGeneration => self.run_report(&task).await,
        }?;

        metrics::record_stage(&String::from(stage), started.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// Cancel a task: terminal, no rollback of persisted stage results
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn cancel(&self, task_id: Uuid) -> Result<()> {
        let _guard = self.locks.acquire(task_id).await;

        let task = self.repo.require_task(task_id).await?;
        if task.task_status().is_terminal() {
            return Err(AppError::WorkflowState {
                message: format!("task {} is already terminal", task_id),
            });
        }

        self.repo
            .update_task_state(
                &task,
                TaskStatus::Cancelled,
                task.stage(),
                task.stage_data.clone(),
                task.last_error.clone(),
            )
            .await?;
        self.repo
            .append_provenance(
                task.id,
                "workflow_state",
                task.id,
                "task_cancelled",
                "system",
                Some(json!({ "status": task.status })),
                Some(json!({ "status": String::from(TaskStatus::Cancelled) })),
            )
            .await?;

        Ok(())
    }

    /// Workflow state summary for callers
    pub async fn status(&self, task_id: Uuid) -> Result<WorkflowSummary> {
        let task = self.repo.require_task(task_id).await?;
        let mut pending_review = 0;
        for stage in [ScreeningStage::TitleAbstract, ScreeningStage::FullText] {
            pending_review += self.repo.count_review_required(task_id, stage).await?;
        }

        Ok(WorkflowSummary {
            id: task.id,
            title: task.title.clone(),
            status: task.task_status(),
            current_stage: task.stage(),
            pending_review,
            last_error: task.last_error.clone(),
            created_at: task.created_at.to_rfc3339(),
            updated_at: task.updated_at.to_rfc3339(),
        })
    }

    // ========================================================================
    // Stage handlers
    // ========================================================================

    async fn run_protocol_validation(&self, task: &ReviewTask) -> Result<AdvanceOutcome> {
        let plan = self.parse_plan(task)?;
        plan.validate()?;
        self.tools.validate_names(&self.config.appraisal.tools)?;

        self.advance_stage(task, task.stage_data.clone()).await
    }

    async fn run_search(&self, task: &ReviewTask) -> Result<AdvanceOutcome> {
        let plan = self.parse_plan(task)?;
        let sources: Vec<SourceConfig> = match task.stage_data.get("source_config") {
            Some(value) => serde_json::from_value::<Vec<SourceConfig>>(value.clone())?
                .into_iter()
                .filter(|s| s.enabled)
                .collect(),
            None => self.config.enabled_sources().cloned().collect(),
        };
        let budget = self
            .config
            .search
            .stage_budget_secs
            .map(Duration::from_secs);

        let outcome = self.gateway.fetch_all(&sources, &plan.query(), budget).await;

        for failure in &outcome.failures {
            warn!(source = %failure.source_name, error = %failure.message, "Source exhausted; continuing with remaining sources");
            self.repo
                .append_provenance(
                    task.id,
                    "source",
                    task.id,
                    "source_failed",
                    "system",
                    None,
                    Some(json!(failure)),
                )
                .await?;
        }

        if outcome.all_failed() {
            let message = format!(
                "all {} configured sources failed: {}",
                outcome.failures.len(),
                outcome
                    .failures
                    .iter()
                    .map(|f| f.source_name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            return self.fail_task(task, message).await;
        }

        let fetched = outcome.records.len() as i64;
        let drafts = outcome
            .records
            .into_iter()
            .map(|(source_name, raw)| draft_record(task.id, &source_name, raw))
            .collect();
        let (inserted, skipped) = self.repo.insert_study_records(task.id, drafts).await?;

        for record in &inserted {
            self.repo
                .append_provenance(
                    task.id,
                    "study_record",
                    record.id,
                    "record_ingested",
                    "system",
                    None,
                    Some(json!({ "source": record.source, "title": record.title })),
                )
                .await?;
        }

        // Cross-source records identical at ingestion (same content hash
        // or DOI) count as duplicates removed before screening
        let prior = self
            .repo
            .find_prisma_log(task.id, PrismaStage::SearchExecution)
            .await?;
        let identified = prior.as_ref().map(|p| p.identified).unwrap_or(0) + fetched;
        let removed_at_ingest =
            prior.as_ref().map(|p| p.duplicates_removed).unwrap_or(0) + skipped as i64;

        self.repo
            .upsert_prisma_log(
                task.id,
                PrismaStage::SearchExecution,
                identified,
                removed_at_ingest,
                0,
                0,
                0,
                0,
                json!({}),
            )
            .await?;

        info!(
            task_id = %task.id,
            identified,
            inserted = inserted.len(),
            skipped,
            "Search execution complete"
        );

        self.advance_stage(task, task.stage_data.clone()).await
    }

    async fn run_deduplication(&self, task: &ReviewTask) -> Result<AdvanceOutcome> {
        let records = self
            .repo
            .list_study_records(
                task.id,
                &StudyFilter {
                    canonical_only: true,
                    ..Default::default()
                },
            )
            .await?;

        let result = deduplicate(&records, &self.config.dedup);
        let by_id: HashMap<Uuid, &StudyRecord> = records.iter().map(|r| (r.id, r)).collect();

        for candidate in &result.matches {
            let status = if candidate.auto_merge {
                MatchStatus::Merged
            } else {
                MatchStatus::NeedsReview
            };
            let stored = self
                .repo
                .insert_duplicate_match(
                    task.id,
                    candidate.record_id,
                    candidate.canonical_id,
                    candidate.strategy,
                    candidate.confidence,
                    status,
                )
                .await?;

            if candidate.auto_merge {
                if let Some(record) = by_id.get(&candidate.record_id) {
                    self.repo.mark_duplicate(record, candidate.canonical_id).await?;
                }
                self.repo
                    .append_provenance(
                        task.id,
                        "study_record",
                        candidate.record_id,
                        "record_merged",
                        "system",
                        Some(json!({ "duplicate_of": null })),
                        Some(json!({
                            "duplicate_of": candidate.canonical_id,
                            "strategy": String::from(candidate.strategy),
                            "confidence": candidate.confidence,
                        })),
                    )
                    .await?;
            } else {
                self.repo
                    .append_provenance(
                        task.id,
                        "duplicate_match",
                        stored.id,
                        "match_needs_review",
                        "system",
                        None,
                        Some(json!(&stored)),
                    )
                    .await?;
            }
        }

        // Clustering is informational only; it runs over the survivors
        // and never touches screening state
        let thresholds = ClusterThresholds {
            topic_low: self.config.clustering.topic_threshold,
            topic_high: self.config.dedup.fuzzy_threshold,
        };
        for cluster in cluster_records(&result.unique, thresholds) {
            self.repo
                .insert_cluster(task.id, cluster.strategy, cluster.cohesion, &cluster.members)
                .await?;
        }

        let search_log = self
            .repo
            .find_prisma_log(task.id, PrismaStage::SearchExecution)
            .await?;
        let identified = search_log.as_ref().map(|p| p.identified).unwrap_or(0);
        let removed_total = search_log.as_ref().map(|p| p.duplicates_removed).unwrap_or(0)
            + result.duplicates_removed as i64;

        self.repo
            .upsert_prisma_log(
                task.id,
                PrismaStage::Deduplication,
                identified,
                removed_total,
                0,
                0,
                0,
                0,
                json!({}),
            )
            .await?;

        info!(
            task_id = %task.id,
            unique = result.unique.len(),
            duplicates_removed = result.duplicates_removed,
            "Deduplication complete"
        );

        self.advance_stage(task, task.stage_data.clone()).await
    }

    async fn run_screening(
        &self,
        task: &ReviewTask,
        stage: ScreeningStage,
    ) -> Result<AdvanceOutcome> {
        let plan = self.parse_plan(task)?;
        let eligible = self.screening_pool(task, stage).await?;

        // Resume from the persisted pending set: records that already
        // carry an active decision at this stage are not re-screened
        let decided: HashSet<Uuid> = self
            .repo
            .active_decisions(task.id, Some(stage))
            .await?
            .iter()
            .map(|d| d.record_id)
            .collect();
        let pending_input: Vec<StudyRecord> = eligible
            .iter()
            .filter(|r| !decided.contains(&r.id))
            .cloned()
            .collect();

        if !pending_input.is_empty() {
            let outcomes = screen_records(
                self.decision.clone(),
                stage,
                &pending_input,
                &plan.criteria(),
                &self.config.screening,
            )
            .await;

            for outcome in &outcomes {
                if let Some(ref code) = outcome.reason_code {
                    screening::validate_reason_code(code, &self.config.screening.exclusion_reasons)?;
                }
                let inserted = self
                    .repo
                    .insert_decision(decision_row(task.id, stage, outcome))
                    .await?;
                self.repo
                    .append_provenance(
                        task.id,
                        "screening_decision",
                        inserted.id,
                        "decision_recorded",
                        "automated",
                        None,
                        Some(json!(inserted)),
                    )
                    .await?;
            }
        }

        // Recompute the stage's counts from every active decision so a
        // resumed run reports the full picture, then fold through the
        // single reducer
        let active = self.repo.active_decisions(task.id, Some(stage)).await?;
        let eligible_ids: HashSet<Uuid> = eligible.iter().map(|r| r.id).collect();
        let outcomes: Vec<_> = active
            .iter()
            .filter(|d| eligible_ids.contains(&d.record_id))
            .map(outcome_from)
            .collect();
        let counts = reduce_counts(&outcomes);

        self.write_screening_log(task, stage, &counts).await?;

        if counts.pending > 0 {
            self.repo
                .update_task_state(
                    task,
                    TaskStatus::Paused,
                    task.stage(),
                    task.stage_data.clone(),
                    None,
                )
                .await?;
            self.repo
                .append_provenance(
                    task.id,
                    "workflow_state",
                    task.id,
                    "stage_paused",
                    "system",
                    Some(json!({ "status": task.status })),
                    Some(json!({
                        "status": String::from(TaskStatus::Paused),
                        "pending_review": counts.pending,
                    })),
                )
                .await?;

            info!(
                task_id = %task.id,
                stage = ?stage,
                pending = counts.pending,
                "Stage blocked on human review"
            );
            return Ok(AdvanceOutcome::Paused {
                stage: task.stage(),
                pending_review: counts.pending as u64,
            });
        }

        self.advance_stage(task, task.stage_data.clone()).await
    }

    async fn run_appraisal(&self, task: &ReviewTask) -> Result<AdvanceOutcome> {
        let included = self.included_at_both_stages(task).await?;
        let existing = self.repo.list_assessments(task.id).await?;
        let already: HashSet<(Uuid, String)> = existing
            .iter()
            .filter(|a| !a.stale)
            .map(|a| (a.record_id, a.tool.clone()))
            .collect();

        for tool_name in &self.config.appraisal.tools {
            let tool = self.tools.resolve(tool_name)?;
            for record in &included {
                if already.contains(&(record.id, tool_name.clone())) {
                    continue;
                }

                let appraisal = tool.appraise(record).await?;
                let row = BiasAssessmentActiveModel {
                    id: Set(Uuid::new_v4()),
                    task_id: Set(task.id),
                    record_id: Set(record.id),
                    tool: Set(appraisal.tool.clone()),
                    domain_ratings: Set(json!(appraisal.domains)),
                    overall: Set(appraisal.overall.into()),
                    stale: Set(false),
                    created_at: Set(Utc::now().into()),
                };
                let inserted = self.repo.insert_assessment(row).await?;
                self.repo
                    .append_provenance(
                        task.id,
                        "bias_assessment",
                        inserted.id,
                        "assessment_recorded",
                        "automated",
                        None,
                        Some(json!(inserted)),
                    )
                    .await?;
            }
        }

        self.repo
            .upsert_prisma_log(
                task.id,
                PrismaStage::QualityAppraisal,
                0,
                0,
                included.len() as i64,
                0,
                included.len() as i64,
                0,
                json!({}),
            )
            .await?;

        self.advance_stage(task, task.stage_data.clone()).await
    }

    async fn run_synthesis(&self, task: &ReviewTask) -> Result<AdvanceOutcome> {
        let included = self.included_at_both_stages(task).await?;
        let existing = self.repo.list_evidence_rows(task.id).await?;
        let extracted_for: HashSet<Uuid> = existing.iter().map(|r| r.record_id).collect();

        for record in &included {
            if extracted_for.contains(&record.id) {
                continue;
            }

            let rows = self.extraction.extract(record).await?;
            for evidence in rows {
                let row = EvidenceRowActiveModel {
                    id: Set(Uuid::new_v4()),
                    task_id: Set(task.id),
                    record_id: Set(record.id),
                    outcome_name: Set(evidence.outcome_name),
                    measure: Set(evidence.measure),
                    effect: Set(evidence.effect),
                    variance: Set(evidence.variance),
                    sample_size: Set(evidence.sample_size),
                    groups: Set(json!(evidence.groups)),
                    stale: Set(false),
                    created_at: Set(Utc::now().into()),
                };
                let inserted = self.repo.insert_evidence_row(row).await?;
                self.repo
                    .append_provenance(
                        task.id,
                        "evidence_row",
                        inserted.id,
                        "evidence_extracted",
                        "automated",
                        None,
                        Some(json!(inserted)),
                    )
                    .await?;
            }
        }

        let rows = self.repo.list_evidence_rows(task.id).await?;
        let syntheses = synthesize(&rows);

        let mut stage_data = task.stage_data.clone();
        stage_data["evidence_synthesis"] = json!(syntheses);

        self.repo
            .upsert_prisma_log(
                task.id,
                PrismaStage::EvidenceSynthesis,
                0,
                0,
                included.len() as i64,
                0,
                included.len() as i64,
                0,
                json!({}),
            )
            .await?;

        info!(
            task_id = %task.id,
            outcomes = syntheses.len(),
            "Evidence synthesis complete"
        );

        self.advance_stage(task, stage_data).await
    }

    async fn run_report(&self, task: &ReviewTask) -> Result<AdvanceOutcome> {
        let logs = self.repo.list_prisma_logs(task.id).await?;

        let mut stage_data = task.stage_data.clone();
        stage_data["report"] = json!({
            "prisma_flow": logs,
            "citation_style": self.config.report.citation_style,
            "output_format": self.config.report.output_format,
        });

        self.repo
            .update_task_state(task, TaskStatus::Completed, task.stage(), stage_data, None)
            .await?;
        self.repo
            .append_provenance(
                task.id,
                "workflow_state",
                task.id,
                "task_completed",
                "system",
                Some(json!({ "status": task.status })),
                Some(json!({ "status": String::from(TaskStatus::Completed) })),
            )
            .await?;

        info!(task_id = %task.id, "Review task completed");
        Ok(AdvanceOutcome::Completed)
    }

    // ========================================================================
    // Shared helpers
    // ========================================================================

    fn parse_plan(&self, task: &ReviewTask) -> Result<ResearchPlan> {
        serde_json::from_value(task.plan.clone()).map_err(|e| AppError::InvalidResearchPlan {
            message: format!("stored plan is malformed: {}", e),
        })
    }

    /// The record pool a screening stage runs over: every canonical
    /// record for stage one, and only active stage-one includes for the
    /// full-text stage
    async fn screening_pool(
        &self,
        task: &ReviewTask,
        stage: ScreeningStage,
    ) -> Result<Vec<StudyRecord>> {
        let canonical = self
            .repo
            .list_study_records(
                task.id,
                &StudyFilter {
                    canonical_only: true,
                    ..Default::default()
                },
            )
            .await?;

        match stage {
            ScreeningStage::TitleAbstract => Ok(canonical),
            ScreeningStage::FullText => {
                let includes = self.included_ids_at(task.id, ScreeningStage::TitleAbstract).await?;
                Ok(canonical
                    .into_iter()
                    .filter(|r| includes.contains(&r.id))
                    .collect())
            }
        }
    }

    /// Record ids with an active, settled include decision at a stage
    async fn included_ids_at(
        &self,
        task_id: Uuid,
        stage: ScreeningStage,
    ) -> Result<HashSet<Uuid>> {
        Ok(self
            .repo
            .active_decisions(task_id, Some(stage))
            .await?
            .iter()
            .filter(|d| d.decision_value() == Decision::Include && !d.review_required)
            .map(|d| d.record_id)
            .collect())
    }

    /// Records included at both screening stages; the only studies
    /// eligible for appraisal and synthesis
    async fn included_at_both_stages(&self, task: &ReviewTask) -> Result<Vec<StudyRecord>> {
        let first = self.included_ids_at(task.id, ScreeningStage::TitleAbstract).await?;
        let second = self.included_ids_at(task.id, ScreeningStage::FullText).await?;

        let canonical = self
            .repo
            .list_study_records(
                task.id,
                &StudyFilter {
                    canonical_only: true,
                    ..Default::default()
                },
            )
            .await?;

        Ok(canonical
            .into_iter()
            .filter(|r| first.contains(&r.id) && second.contains(&r.id))
            .collect())
    }

    async fn write_screening_log(
        &self,
        task: &ReviewTask,
        stage: ScreeningStage,
        counts: &StageCounts,
    ) -> Result<()> {
        let prisma_stage = match stage {
            ScreeningStage::TitleAbstract => PrismaStage::TitleAbstractScreening,
            ScreeningStage::FullText => PrismaStage::FullTextScreening,
        };

        self.repo
            .upsert_prisma_log(
                task.id,
                prisma_stage,
                0,
                0,
                counts.screened,
                counts.excluded,
                counts.included,
                counts.pending,
                json!(counts.exclusion_reasons),
            )
            .await?;
        Ok(())
    }

    /// Advance to the next stage: the PRISMA row and stage work are
    /// already persisted by the caller; this appends the transition
    /// event and persists the new workflow state, in that order.
    async fn advance_stage(
        &self,
        task: &ReviewTask,
        stage_data: serde_json::Value,
    ) -> Result<AdvanceOutcome> {
        let from = task.stage();
        let to = from.next().ok_or_else(|| AppError::WorkflowState {
            message: "report_generation is the final stage".to_string(),
        })?;

        self.repo
            .append_provenance(
                task.id,
                "workflow_state",
                task.id,
                "stage_advanced",
                "system",
                Some(json!({ "stage": String::from(from) })),
                Some(json!({ "stage": String::from(to) })),
            )
            .await?;
        self.repo
            .update_task_state(task, TaskStatus::Running, to, stage_data, None)
            .await?;

        info!(task_id = %task.id, from = ?from, to = ?to, "Stage advanced");
        Ok(AdvanceOutcome::Advanced { from, to })
    }

    /// Transition to terminal `failed`, preserving the triggering error
    /// and the last successfully computed PRISMA rows
    async fn fail_task(&self, task: &ReviewTask, message: String) -> Result<AdvanceOutcome> {
        warn!(task_id = %task.id, error = %message, "Task failed");

        self.repo
            .update_task_state(
                task,
                TaskStatus::Failed,
                task.stage(),
                task.stage_data.clone(),
                Some(message.clone()),
            )
            .await?;
        self.repo
            .append_provenance(
                task.id,
                "workflow_state",
                task.id,
                "task_failed",
                "system",
                Some(json!({ "status": task.status })),
                Some(json!({
                    "status": String::from(TaskStatus::Failed),
                    "error": message,
                })),
            )
            .await?;

        Ok(AdvanceOutcome::Failed {
            stage: task.stage(),
            error: message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_task_locks_serialize_per_task() {
        let locks = Arc::new(TaskLocks::default());
        let task_id = Uuid::from_u128(1);

        let guard = locks.acquire(task_id).await;

        // The same task cannot be acquired while held
        let contended = {
            let locks = locks.clone();
            tokio::time::timeout(Duration::from_millis(50), async move {
                locks.acquire(task_id).await
            })
            .await
        };
        assert!(contended.is_err());

        // An independent task proceeds immediately
        let other = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire(Uuid::from_u128(2)),
        )
        .await;
        assert!(other.is_ok());

        drop(guard);
        let reacquired =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire(task_id)).await;
        assert!(reacquired.is_ok());
    }

    #[test]
    fn test_advance_outcome_serialization() {
        let outcome = AdvanceOutcome::Paused {
            stage: PrismaStage::TitleAbstractScreening,
            pending_review: 3,
        };
        let value = json!(outcome);
        assert_eq!(value["status"], "paused");
        assert_eq!(value["stage"], "title_abstract_screening");
        assert_eq!(value["pending_review"], 3);
    }
}
