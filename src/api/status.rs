use super::{AppError, AppState};
use crate::jobs::{JobStatus, JobStatusUpdate};
use axum::{
    body::Bytes,
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Serialize)]
struct StatusResponse {
    success: bool,
    data: JobStatus,
}

#[derive(Deserialize)]
struct StatusQuery {
    #[serde(rename = "jobId")]
    job_id: Option<String>,
}

/// Create router with the job status endpoints
pub fn create_status_router(state: AppState) -> Router {
    Router::new()
        .route("/api/backfill/status", get(get_status).post(update_status))
        .with_state(Arc::new(state))
}

/// POST /api/backfill/status - Record a status report from an executor
async fn update_status(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<StatusResponse>, AppError> {
    let update: JobStatusUpdate = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Invalid status update payload");
        AppError::Invalid("Invalid status update payload".to_string())
    })?;

    info!(
        job_id = %update.job_id,
        status = ?update.status,
        progress = ?update.progress,
        processed_events = ?update.processed_events,
        "Received status update"
    );

    let data = state
        .registry
        .apply(update)
        .map_err(|e| AppError::Invalid(e.to_string()))?;

    Ok(Json(StatusResponse {
        success: true,
        data,
    }))
}

/// GET /api/backfill/status?jobId= - Latest known status of a job
async fn get_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusResponse>, AppError> {
    let job_id = query
        .job_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Invalid("Job ID is required".to_string()))?;

    let data = state
        .registry
        .get(&job_id)
        .ok_or_else(|| AppError::NotFound("Job status not found".to_string()))?;

    Ok(Json(StatusResponse {
        success: true,
        data,
    }))
}
