//! PRISMA flow and provenance handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::AppState;
use revforge_common::db::models::{PrismaLog, ProvenanceEvent};
use revforge_common::errors::Result;

#[derive(Serialize)]
pub struct PrismaStageRow {
    pub stage: String,
    pub identified: i64,
    pub duplicates_removed: i64,
    pub screened: i64,
    pub excluded: i64,
    pub included: i64,
    pub pending: i64,
    pub exclusion_reasons: BTreeMap<String, i64>,
    pub updated_at: String,
}

impl From<PrismaLog> for PrismaStageRow {
    fn from(log: PrismaLog) -> Self {
        Self {
            stage: log.stage.clone(),
            identified: log.identified,
            duplicates_removed: log.duplicates_removed,
            screened: log.screened,
            excluded: log.excluded,
            included: log.included,
            pending: log.pending,
            exclusion_reasons: log.reason_counts(),
            updated_at: log.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct PrismaFlowResponse {
    pub task_id: Uuid,
    pub stages: Vec<PrismaStageRow>,
}

/// PRISMA flow counts per stage. A failed task still exposes the rows
/// of its last successfully computed stage.
pub async fn get_prisma_flow(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<PrismaFlowResponse>> {
    state.orchestrator.repository().require_task(task_id).await?;

    let logs = state
        .orchestrator
        .repository()
        .list_prisma_logs(task_id)
        .await?;

    Ok(Json(PrismaFlowResponse {
        task_id,
        stages: logs.into_iter().map(PrismaStageRow::from).collect(),
    }))
}

#[derive(Serialize)]
pub struct ProvenanceEventResponse {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub action: String,
    pub actor: String,
    pub previous: Option<serde_json::Value>,
    pub new: Option<serde_json::Value>,
    pub created_at: String,
}

impl From<ProvenanceEvent> for ProvenanceEventResponse {
    fn from(event: ProvenanceEvent) -> Self {
        Self {
            id: event.id,
            entity_type: event.entity_type.clone(),
            entity_id: event.entity_id,
            action: event.action.clone(),
            actor: event.actor.clone(),
            previous: event.previous.clone(),
            new: event.new.clone(),
            created_at: event.created_at.to_rfc3339(),
        }
    }
}

/// Full append-only audit trail for a task, oldest first
pub async fn get_provenance(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Vec<ProvenanceEventResponse>>> {
    state.orchestrator.repository().require_task(task_id).await?;

    let events = state
        .orchestrator
        .repository()
        .list_provenance(task_id)
        .await?;

    Ok(Json(
        events.into_iter().map(ProvenanceEventResponse::from).collect(),
    ))
}
