//! Review task lifecycle handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use revforge_common::config::SourceConfig;
use revforge_common::errors::{AppError, Result};
use revforge_engine::workflow::{AdvanceOutcome, ResearchPlan, WorkflowSummary};

/// Request to create a new review task
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTaskRequest {
    #[validate(length(min = 1, max = 500))]
    pub title: String,

    /// Research plan with PICO/SPIDER fields and criteria
    pub plan: ResearchPlan,

    /// Optional per-task source configuration; the service-level one
    /// applies when omitted
    pub sources: Option<Vec<SourceConfig>>,
}

/// Response after creating a task
#[derive(Serialize)]
pub struct CreateTaskResponse {
    pub id: Uuid,
    pub status: String,
    pub current_stage: String,
    pub status_url: String,
}

/// Create a new review task. The plan is validated before anything is
/// persisted; a rejected plan never creates a study record.
pub async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<CreateTaskResponse>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let task = state
        .orchestrator
        .create_task(request.title, request.plan, request.sources)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateTaskResponse {
            id: task.id,
            status: task.status.clone(),
            current_stage: task.current_stage.clone(),
            status_url: format!("/v1/tasks/{}", task.id),
        }),
    ))
}

/// Get a task's workflow state summary
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowSummary>> {
    let summary = state.orchestrator.status(id).await?;
    Ok(Json(summary))
}

/// Drive the task's next stage. A paused response is a blocked stage
/// awaiting human review, not a failure.
pub async fn advance_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AdvanceOutcome>> {
    let outcome = state.orchestrator.advance(id).await?;
    Ok(Json(outcome))
}

/// Cancel a task. Already-persisted stage results are kept.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.orchestrator.cancel(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
