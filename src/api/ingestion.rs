use super::AppState;
use crate::client::SubmissionError;
use crate::event::{validate_ingest_event, IngestEvent};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Success response for event ingestion
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendEventsResponse {
    message: String,
    count: usize,
    usage_response: Value,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

/// Create router with the event ingestion endpoint
pub fn create_ingestion_router(state: AppState) -> Router {
    Router::new()
        .route("/api/send-events", post(send_events))
        .with_state(Arc::new(state))
}

/// POST /api/send-events - Forward a batch of events to the Usage API
async fn send_events(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<SendEventsResponse>, IngestionError> {
    // Checked before anything else so no upstream call is attempted
    let usage_api = state.usage_api.clone().ok_or_else(|| {
        error!("Usage API token is not configured");
        IngestionError::Configuration
    })?;

    let events = parse_events(&body)?;

    info!(count = events.len(), "Forwarding events to Usage API");

    let usage_response = usage_api.ingest(&events).await.map_err(|e| match e {
        SubmissionError::IngestionRejected { status, details } => {
            warn!(status, details = %details, "Usage API rejected events");
            IngestionError::Upstream { status, details }
        }
        other => {
            error!(error = %other, "Failed to forward events");
            IngestionError::Internal
        }
    })?;

    Ok(Json(SendEventsResponse {
        message: "Events processed successfully".to_string(),
        count: events.len(),
        usage_response,
    }))
}

fn parse_events(body: &[u8]) -> Result<Vec<IngestEvent>, IngestionError> {
    let request: Value = serde_json::from_slice(body)
        .map_err(|e| IngestionError::Validation(format!("Invalid JSON: {}", e)))?;

    let raw_events = request
        .get("events")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            IngestionError::Validation(
                "Invalid request body: events array is required".to_string(),
            )
        })?;

    raw_events
        .iter()
        .map(|raw| {
            if !raw.get("properties").map_or(false, Value::is_object) {
                return Err(IngestionError::Validation(
                    "Invalid event: properties must be an object".to_string(),
                ));
            }
            let event: IngestEvent = serde_json::from_value(raw.clone()).map_err(|_| {
                IngestionError::Validation("Invalid event: missing required fields".to_string())
            })?;
            validate_ingest_event(&event)
                .map_err(|e| IngestionError::Validation(format!("Invalid event: {}", e)))?;
            Ok(event)
        })
        .collect()
}

/// Ingestion error types
enum IngestionError {
    Validation(String),
    Configuration,
    /// Upstream status and body passed through
    Upstream { status: u16, details: Value },
    Internal,
}

impl IntoResponse for IngestionError {
    fn into_response(self) -> Response {
        let (status, message, details) = match self {
            IngestionError::Validation(msg) => (StatusCode::BAD_REQUEST, msg, None),
            IngestionError::Configuration => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Server configuration error".to_string(),
                None,
            ),
            IngestionError::Upstream { status, details } => (
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                "Error from Usage API".to_string(),
                Some(details),
            ),
            IngestionError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error".to_string(),
                None,
            ),
        };
        (status, Json(ErrorResponse { message, details })).into_response()
    }
}
