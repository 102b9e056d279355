//! Screening engine
//!
//! Applies inclusion/exclusion criteria to studies in two sequential
//! stages (title/abstract, then full text). Every record gets a
//! decision, actor, confidence, and rationale; automated decisions
//! below the confidence threshold are routed to human review and block
//! the task from advancing past their stage.
//!
//! Automated decisions for different records are evaluated concurrently
//! (no ordering dependency); PRISMA counts are folded through a single
//! reducer to avoid lost updates.

use chrono::Utc;
use futures::future::join_all;
use revforge_common::capabilities::{ClassifiedDecision, DecisionCapability};
use revforge_common::config::ScreeningConfig;
use revforge_common::db::models::{
    Actor, Decision, ScreeningDecision, ScreeningDecisionActiveModel, ScreeningStage, StudyRecord,
};
use revforge_common::db::Repository;
use revforge_common::errors::{AppError, Result};
use revforge_common::metrics;
use sea_orm::Set;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Outcome of screening one record at one stage
#[derive(Debug, Clone)]
pub struct ScreeningOutcome {
    pub record_id: Uuid,
    pub decision: Decision,
    pub confidence: f64,
    pub rationale: String,
    pub reason_code: Option<String>,
    /// Low-confidence or uncertain automated decisions require a human
    /// before the stage can complete
    pub review_required: bool,
}

/// Aggregated stage counts, produced by the single reducer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageCounts {
    pub screened: i64,
    pub included: i64,
    pub excluded: i64,
    pub pending: i64,
    pub exclusion_reasons: BTreeMap<String, i64>,
}

/// Validate an exclusion reason code against the configured vocabulary
pub fn validate_reason_code(code: &str, vocabulary: &[String]) -> Result<()> {
    if vocabulary.iter().any(|v| v == code) {
        Ok(())
    } else {
        Err(AppError::UnknownExclusionReason {
            code: code.to_string(),
        })
    }
}

/// Classify one record through the decision capability, mapping failures
/// and contract violations onto an uncertain, review-required outcome so
/// a single bad payload cannot fail the whole stage.
async fn classify_record(
    capability: &dyn DecisionCapability,
    record: &StudyRecord,
    criteria: &[String],
    config: &ScreeningConfig,
) -> ScreeningOutcome {
    let classified = match capability.classify(record, criteria).await {
        Ok(c) => c,
        Err(e) => {
            warn!(record_id = %record.id, error = %e, "Classification failed; routing to human review");
            ClassifiedDecision {
                decision: Decision::Uncertain,
                confidence: 0.0,
                rationale: format!("automated classification unavailable: {}", e),
            }
        }
    };

    let below_threshold = classified.confidence < config.confidence_threshold;
    let review_required = config.require_human_review
        && (below_threshold || classified.decision == Decision::Uncertain);

    // Exclusion reasons from the capability ride in the rationale; the
    // reason code is attached by criteria matching upstream or left for
    // the human reviewer. Automated excludes carry the generic code
    // only when it is part of the vocabulary.
    let reason_code = match classified.decision {
        Decision::Exclude => config
            .exclusion_reasons
            .iter()
            .find(|code| classified.rationale.contains(code.as_str()))
            .cloned(),
        _ => None,
    };

    ScreeningOutcome {
        record_id: record.id,
        decision: classified.decision,
        confidence: classified.confidence,
        rationale: classified.rationale,
        reason_code,
        review_required,
    }
}

/// Screen a batch of records concurrently at one stage
#[instrument(skip_all, fields(stage = ?stage, records = records.len()))]
pub async fn screen_records(
    capability: Arc<dyn DecisionCapability>,
    stage: ScreeningStage,
    records: &[StudyRecord],
    criteria: &[String],
    config: &ScreeningConfig,
) -> Vec<ScreeningOutcome> {
    let futures = records
        .iter()
        .map(|record| classify_record(capability.as_ref(), record, criteria, config));

    let outcomes = join_all(futures).await;

    for outcome in &outcomes {
        metrics::record_screening_decision(
            &String::from(stage),
            "automated",
            &String::from(outcome.decision),
        );
    }

    outcomes
}

/// Rebuild an outcome from a persisted active decision, so stage counts
/// can be recomputed after a restart from the same pending set
pub fn outcome_from(decision: &ScreeningDecision) -> ScreeningOutcome {
    ScreeningOutcome {
        record_id: decision.record_id,
        decision: decision.decision_value(),
        confidence: decision.confidence,
        rationale: decision.rationale.clone(),
        reason_code: decision.reason_code.clone(),
        review_required: decision.review_required,
    }
}

/// The single accumulation point for stage counts. A review-required
/// outcome counts as pending regardless of its decision value, so
/// `included = screened - excluded - pending` holds by construction.
pub fn reduce_counts(outcomes: &[ScreeningOutcome]) -> StageCounts {
    let mut counts = StageCounts {
        screened: outcomes.len() as i64,
        ..Default::default()
    };

    for outcome in outcomes {
        if outcome.review_required || outcome.decision == Decision::Uncertain {
            counts.pending += 1;
            continue;
        }
        match outcome.decision {
            Decision::Include => counts.included += 1,
            Decision::Exclude => {
                counts.excluded += 1;
                if let Some(ref code) = outcome.reason_code {
                    *counts.exclusion_reasons.entry(code.clone()).or_insert(0) += 1;
                }
            }
            Decision::Uncertain => unreachable!("uncertain handled above"),
        }
    }

    counts
}

/// Build the persistable decision row for an automated outcome
pub fn decision_row(
    task_id: Uuid,
    stage: ScreeningStage,
    outcome: &ScreeningOutcome,
) -> ScreeningDecisionActiveModel {
    ScreeningDecisionActiveModel {
        id: Set(Uuid::new_v4()),
        task_id: Set(task_id),
        record_id: Set(outcome.record_id),
        stage: Set(stage.into()),
        decision: Set(outcome.decision.into()),
        reason_code: Set(outcome.reason_code.clone()),
        actor: Set(Actor::Automated.into()),
        confidence: Set(outcome.confidence),
        rationale: Set(outcome.rationale.clone()),
        review_required: Set(outcome.review_required),
        superseded: Set(false),
        created_at: Set(Utc::now().into()),
    }
}

/// A human decision submitted for one (record, stage) pair
#[derive(Debug, Clone)]
pub struct HumanDecision {
    pub decision: Decision,
    pub reason_code: Option<String>,
    pub rationale: String,
    pub submitted_by: String,
}

/// Submit a human screening decision.
///
/// A human decision always supersedes an automated one for the same
/// (record, stage) pair and is recorded as an explicit override
/// provenance event carrying both old and new values. An existing
/// active human decision is terminal: the submission is rejected and
/// the original preserved. When the override reverses an include that
/// already fed downstream appraisal or extraction, those entries are
/// marked stale, not deleted.
#[instrument(skip(repo, submission), fields(record_id = %record_id, stage = ?stage))]
pub async fn submit_human_decision(
    repo: &Repository,
    config: &ScreeningConfig,
    record_id: Uuid,
    stage: ScreeningStage,
    submission: HumanDecision,
) -> Result<ScreeningDecision> {
    if submission.decision == Decision::Exclude {
        let code = submission.reason_code.as_deref().ok_or_else(|| AppError::Validation {
            message: "an exclusion decision requires a reason code".to_string(),
            field: Some("reason_code".to_string()),
        })?;
        validate_reason_code(code, &config.exclusion_reasons)?;
    }

    let record = repo.require_record(record_id).await?;
    let previous = repo.find_active_decision(record_id, stage).await?;

    if let Some(ref existing) = previous {
        if existing.decision_actor() == Actor::Human {
            return Err(AppError::DecisionConflict {
                record_id: record_id.to_string(),
                stage: String::from(stage),
            });
        }
    }

    let row = ScreeningDecisionActiveModel {
        id: Set(Uuid::new_v4()),
        task_id: Set(record.task_id),
        record_id: Set(record_id),
        stage: Set(stage.into()),
        decision: Set(submission.decision.into()),
        reason_code: Set(submission.reason_code.clone()),
        actor: Set(Actor::Human.into()),
        confidence: Set(1.0),
        rationale: Set(submission.rationale.clone()),
        review_required: Set(false),
        superseded: Set(false),
        created_at: Set(Utc::now().into()),
    };

    if let Some(ref old) = previous {
        repo.supersede_decision(old).await?;
    }
    let inserted = repo.insert_decision(row).await?;

    let action = if previous.is_some() {
        "decision_overridden"
    } else {
        "decision_recorded"
    };
    repo.append_provenance(
        record.task_id,
        "screening_decision",
        inserted.id,
        action,
        &submission.submitted_by,
        previous.as_ref().map(|p| json!(p)),
        Some(json!(inserted)),
    )
    .await?;

    metrics::record_screening_decision(
        &String::from(stage),
        "human",
        &String::from(submission.decision),
    );

    // A reversed include invalidates downstream results computed under it
    let reversed_include = previous
        .as_ref()
        .map(|p| p.decision_value() == Decision::Include && submission.decision != Decision::Include)
        .unwrap_or(false);
    if reversed_include {
        let stale_assessments = repo.mark_assessments_stale(record_id).await?;
        let stale_rows = repo.mark_evidence_stale(record_id).await?;
        if stale_assessments + stale_rows > 0 {
            warn!(
                record_id = %record_id,
                stale_assessments,
                stale_rows,
                "Human override invalidated downstream entries"
            );
        }
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use revforge_common::capabilities::ClassifiedDecision;
    use serde_json::json;

    struct ScriptedClassifier;

    #[async_trait]
    impl DecisionCapability for ScriptedClassifier {
        async fn classify(
            &self,
            record: &StudyRecord,
            _criteria: &[String],
        ) -> Result<ClassifiedDecision> {
            // Scripted by title so tests control each outcome
            let (decision, confidence) = if record.title.contains("rodent") {
                (Decision::Exclude, 0.95)
            } else if record.title.contains("maybe") {
                (Decision::Include, 0.6)
            } else {
                (Decision::Include, 0.9)
            };
            Ok(ClassifiedDecision {
                decision,
                confidence,
                rationale: if decision == Decision::Exclude {
                    "WRONG_POPULATION: study population is rodents".to_string()
                } else {
                    "meets criteria".to_string()
                },
            })
        }
    }

    fn record(n: u128, title: &str) -> StudyRecord {
        let ts = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z").unwrap();
        StudyRecord {
            id: Uuid::from_u128(n),
            task_id: Uuid::from_u128(999),
            title: title.to_string(),
            authors: json!(["Smith, J."]),
            year: Some(2020),
            doi: None,
            source: "test".to_string(),
            abstract_text: Some("...".to_string()),
            full_text_ref: None,
            content_hash: format!("hash-{}", n),
            metadata: json!({}),
            duplicate_of: None,
            ingested_at: ts,
            created_at: ts,
        }
    }

    #[tokio::test]
    async fn test_low_confidence_routes_to_review() {
        let config = ScreeningConfig::default();
        let records = vec![record(1, "maybe relevant trial")];

        let outcomes = screen_records(
            Arc::new(ScriptedClassifier),
            ScreeningStage::TitleAbstract,
            &records,
            &["adults".to_string()],
            &config,
        )
        .await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].review_required);
        assert_eq!(outcomes[0].decision, Decision::Include);
    }

    #[tokio::test]
    async fn test_reducer_counts_and_invariant() {
        let config = ScreeningConfig::default();
        let mut records = Vec::new();
        for n in 0..70 {
            records.push(record(n, "human trial of intervention"));
        }
        for n in 70..100 {
            records.push(record(n, "rodent model experiment"));
        }

        let outcomes = screen_records(
            Arc::new(ScriptedClassifier),
            ScreeningStage::TitleAbstract,
            &records,
            &[],
            &config,
        )
        .await;
        let counts = reduce_counts(&outcomes);

        assert_eq!(counts.screened, 100);
        assert_eq!(counts.excluded, 30);
        assert_eq!(counts.included, 70);
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.exclusion_reasons.get("WRONG_POPULATION"), Some(&30));
        assert_eq!(
            counts.included,
            counts.screened - counts.excluded - counts.pending
        );
    }

    #[tokio::test]
    async fn test_pending_outcomes_not_counted_as_included() {
        let config = ScreeningConfig::default();
        let records = vec![
            record(1, "clear trial"),
            record(2, "maybe relevant trial"),
            record(3, "rodent experiment"),
        ];

        let outcomes = screen_records(
            Arc::new(ScriptedClassifier),
            ScreeningStage::TitleAbstract,
            &records,
            &[],
            &config,
        )
        .await;
        let counts = reduce_counts(&outcomes);

        assert_eq!(counts.screened, 3);
        assert_eq!(counts.included, 1);
        assert_eq!(counts.excluded, 1);
        assert_eq!(counts.pending, 1);
    }

    #[test]
    fn test_unknown_reason_code_rejected() {
        let vocabulary = vec!["WRONG_POPULATION".to_string()];
        assert!(validate_reason_code("WRONG_POPULATION", &vocabulary).is_ok());
        let err = validate_reason_code("BAD_VIBES", &vocabulary).unwrap_err();
        assert!(matches!(err, AppError::UnknownExclusionReason { .. }));
    }

    #[tokio::test]
    async fn test_classification_failure_becomes_review_required() {
        struct FailingClassifier;

        #[async_trait]
        impl DecisionCapability for FailingClassifier {
            async fn classify(
                &self,
                _record: &StudyRecord,
                _criteria: &[String],
            ) -> Result<ClassifiedDecision> {
                Err(AppError::CapabilityContract {
                    message: "decision 'perhaps' is outside the contract".to_string(),
                })
            }
        }

        let config = ScreeningConfig::default();
        let outcomes = screen_records(
            Arc::new(FailingClassifier),
            ScreeningStage::FullText,
            &[record(1, "any")],
            &[],
            &config,
        )
        .await;

        assert_eq!(outcomes[0].decision, Decision::Uncertain);
        assert!(outcomes[0].review_required);
        assert_eq!(outcomes[0].confidence, 0.0);
    }
}
