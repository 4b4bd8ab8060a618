use super::{AppError, AppState};
use crate::backfill::{BackfillConfig, ResolvedBackfill};
use crate::jobs::{JobState, JobStatusUpdate};
use axum::{body::Bytes, extract::State, response::Json, routing::post, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// Success response for backfill submission
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BackfillAccepted {
    success: bool,
    message: String,
    job_id: String,
    /// Only in test mode
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<ResolvedBackfill>,
}

/// Create router with the backfill submission endpoint
pub fn create_backfill_router(state: AppState) -> Router {
    Router::new()
        .route("/api/backfill", post(submit_backfill))
        .with_state(Arc::new(state))
}

/// POST /api/backfill - Validate a backfill and hand it to the executor
async fn submit_backfill(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<BackfillAccepted>, AppError> {
    let config: BackfillConfig = serde_json::from_slice(&body)
        .map_err(|e| AppError::Invalid(format!("Invalid request body: {}", e)))?;

    info!(
        event_name = %config.event_name,
        start_date = %config.start_date,
        end_date = %config.end_date,
        test_mode = config.test_mode,
        properties = config.properties.len(),
        "Received backfill request"
    );

    let job_id = uuid::Uuid::new_v4().to_string();
    let resolved = config
        .resolve(job_id.clone(), &state.date_policy(), &mut rand::thread_rng())
        .map_err(|e| {
            info!(error = %e, "Backfill request rejected");
            AppError::Invalid(e.to_string())
        })?;

    if config.test_mode {
        info!(job_id = %job_id, total_events = resolved.total_events(), "Test mode, returning resolved config");
        return Ok(Json(BackfillAccepted {
            success: true,
            message: "Validation successful (test mode)".to_string(),
            job_id,
            config: Some(resolved),
        }));
    }

    let executor = state.executor.clone().ok_or_else(|| {
        error!("Backfill executor is not configured");
        AppError::Configuration
    })?;

    let mut pending = JobStatusUpdate::new(job_id.clone(), JobState::Pending);
    pending.total_events = Some(resolved.total_events());
    pending.processed_events = Some(0);
    state
        .registry
        .apply(pending)
        .map_err(|_| AppError::Internal)?;

    if let Err(e) = executor.dispatch(&resolved).await {
        error!(job_id = %job_id, error = %format!("{:#}", e), "Failed to dispatch backfill job");
        let mut failed = JobStatusUpdate::new(job_id.clone(), JobState::Failed);
        failed.error = Some(e.to_string());
        let _ = state.registry.apply(failed);
        return Err(AppError::Internal);
    }

    Ok(Json(BackfillAccepted {
        success: true,
        message: "Backfill job submitted successfully".to_string(),
        job_id,
        config: None,
    }))
}
