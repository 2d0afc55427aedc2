use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use serde_json::{json, Value};

use super::AppState;
use crate::{
    error::AppResult,
    models::ModelSummary,
    services::scheduler::SchedulerStatus,
};

#[derive(Debug, Serialize)]
pub struct ModelStatus {
    pub active: ModelSummary,
    pub previous_version: Option<u64>,
    pub scheduler: SchedulerStatus,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<ModelStatus> {
    Json(ModelStatus {
        active: state.registry.active().summary(),
        previous_version: state.registry.previous().map(|p| p.version),
        scheduler: state.scheduler.status(),
    })
}

/// Queues a retrain; it is folded into the current cycle's rerun if one is running
pub async fn retrain(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    state.scheduler.request_retrain();
    tracing::info!("Manual retrain requested");
    (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" })))
}

pub async fn rollback(State(state): State<Arc<AppState>>) -> AppResult<Json<ModelSummary>> {
    let active = state.registry.rollback().await?;
    Ok(Json(active.summary()))
}
