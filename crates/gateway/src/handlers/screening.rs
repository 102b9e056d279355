//! Human screening decision handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use revforge_common::db::models::{Decision, ScreeningStage};
use revforge_common::errors::{AppError, Result};
use revforge_engine::screening::{submit_human_decision, HumanDecision};

/// A human reviewer's decision for one (record, stage) pair
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitDecisionRequest {
    /// "title_abstract" or "full_text"
    pub stage: String,

    /// "include", "exclude", or "uncertain"
    pub decision: String,

    /// Required for exclusions; must come from the configured vocabulary
    pub reason_code: Option<String>,

    #[validate(length(min = 1, max = 10000))]
    pub rationale: String,

    #[validate(length(min = 1, max = 200))]
    pub submitted_by: String,
}

#[derive(Serialize)]
pub struct SubmitDecisionResponse {
    pub id: Uuid,
    pub record_id: Uuid,
    pub stage: String,
    pub decision: String,
    pub actor: String,
    pub confidence: f64,
}

/// Submit a human decision. Always supersedes an automated decision for
/// the same pair (recorded as an override event); rejected with a
/// conflict when a human decision already stands.
pub async fn submit_decision(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
    Json(request): Json<SubmitDecisionRequest>,
) -> Result<(StatusCode, Json<SubmitDecisionResponse>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let stage = match request.stage.as_str() {
        "title_abstract" => ScreeningStage::TitleAbstract,
        "full_text" => ScreeningStage::FullText,
        other => {
            return Err(AppError::Validation {
                message: format!("unknown screening stage '{}'", other),
                field: Some("stage".to_string()),
            })
        }
    };

    let decision = Decision::parse_strict(&request.decision).ok_or_else(|| {
        AppError::Validation {
            message: format!("unknown decision '{}'", request.decision),
            field: Some("decision".to_string()),
        }
    })?;

    let stored = submit_human_decision(
        state.orchestrator.repository(),
        &state.config.screening,
        record_id,
        stage,
        HumanDecision {
            decision,
            reason_code: request.reason_code,
            rationale: request.rationale,
            submitted_by: request.submitted_by,
        },
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitDecisionResponse {
            id: stored.id,
            record_id: stored.record_id,
            stage: stored.stage.clone(),
            decision: stored.decision.clone(),
            actor: stored.actor.clone(),
            confidence: stored.confidence,
        }),
    ))
}
