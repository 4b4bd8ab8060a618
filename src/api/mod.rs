// HTTP boundary: event ingestion, backfill submission, job status

mod backfill;
mod ingestion;
mod status;

pub use backfill::create_backfill_router;
pub use ingestion::create_ingestion_router;
pub use status::create_status_router;

use crate::backfill::DateRangePolicy;
use crate::client::UsageApiClient;
use crate::config::BackfillSettings;
use crate::dispatch::BackfillExecutor;
use crate::jobs::JobStatusRegistry;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Router,
};
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// `None` when no Usage API token is configured
    pub usage_api: Option<Arc<UsageApiClient>>,
    /// `None` when no backfill script is configured
    pub executor: Option<Arc<dyn BackfillExecutor>>,
    pub registry: JobStatusRegistry,
    /// Supplies the accepted date window
    pub backfill: BackfillSettings,
    /// Pins "today" for the date policy; the local date otherwise
    pub today: Option<NaiveDate>,
}

impl AppState {
    pub fn new(registry: JobStatusRegistry) -> Self {
        Self {
            usage_api: None,
            executor: None,
            registry,
            backfill: BackfillSettings::default(),
            today: None,
        }
    }

    pub fn date_policy(&self) -> DateRangePolicy {
        self.backfill.date_policy(self.today)
    }
}

/// Create the full service router with CORS enabled
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(create_ingestion_router(state.clone()))
        .merge(create_backfill_router(state.clone()))
        .merge(create_status_router(state))
        .layer(CorsLayer::permissive())
}

/// `{success: false, message}` body used by the backfill and status routes
#[derive(Serialize)]
struct FailureResponse {
    success: bool,
    message: String,
}

/// Backfill and status route errors
#[derive(Debug)]
enum AppError {
    Invalid(String),
    NotFound(String),
    Configuration,
    Internal,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Invalid(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Configuration => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Server configuration error".to_string(),
            ),
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };
        let body = Json(FailureResponse {
            success: false,
            message,
        });
        (status, body).into_response()
    }
}
