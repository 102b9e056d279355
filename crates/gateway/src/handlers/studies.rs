//! Study listing handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use revforge_common::db::models::{Decision, ScreeningStage, StudyRecord};
use revforge_common::db::StudyFilter;
use revforge_common::errors::{AppError, Result};

#[derive(Debug, Default, Deserialize)]
pub struct StudyQuery {
    /// Restrict to records with an active decision at this stage
    pub stage: Option<String>,
    /// Restrict to records with this active decision value
    pub decision: Option<String>,
    /// Only canonical (non-duplicate) records; defaults to true
    pub canonical_only: Option<bool>,
}

#[derive(Serialize)]
pub struct StudyResponse {
    pub id: Uuid,
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub doi: Option<String>,
    pub source: String,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub duplicate_of: Option<Uuid>,
    pub ingested_at: String,
}

impl From<StudyRecord> for StudyResponse {
    fn from(record: StudyRecord) -> Self {
        Self {
            id: record.id,
            title: record.title.clone(),
            authors: record.author_list(),
            year: record.year,
            doi: record.doi.clone(),
            source: record.source.clone(),
            abstract_text: record.abstract_text.clone(),
            duplicate_of: record.duplicate_of,
            ingested_at: record.ingested_at.to_rfc3339(),
        }
    }
}

fn parse_stage(value: &str) -> Result<ScreeningStage> {
    match value {
        "title_abstract" => Ok(ScreeningStage::TitleAbstract),
        "full_text" => Ok(ScreeningStage::FullText),
        other => Err(AppError::Validation {
            message: format!("unknown screening stage '{}'", other),
            field: Some("stage".to_string()),
        }),
    }
}

fn parse_decision(value: &str) -> Result<Decision> {
    Decision::parse_strict(value).ok_or_else(|| AppError::Validation {
        message: format!("unknown decision '{}'", value),
        field: Some("decision".to_string()),
    })
}

/// List study records for a task with optional stage/decision filters
pub async fn list_studies(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Query(query): Query<StudyQuery>,
) -> Result<Json<Vec<StudyResponse>>> {
    // 404 for unknown tasks rather than an empty list
    state.orchestrator.repository().require_task(task_id).await?;

    let filter = StudyFilter {
        canonical_only: query.canonical_only.unwrap_or(true),
        stage: query.stage.as_deref().map(parse_stage).transpose()?,
        decision: query.decision.as_deref().map(parse_decision).transpose()?,
    };

    let records = state
        .orchestrator
        .repository()
        .list_study_records(task_id, &filter)
        .await?;

    Ok(Json(records.into_iter().map(StudyResponse::from).collect()))
}
