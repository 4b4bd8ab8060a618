//! HTTP clients: the composer's own boundary and the upstream Usage API.

use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;

pub mod submission;
pub mod usage_api;

pub use submission::{BackfillResponse, SendEventsResponse, StatusResponse, SubmissionClient};
pub use usage_api::{
    Backfill, CreateBackfillRequest, FailedEvent, IngestResult, UsageApiClient, DEFAULT_BASE_URL,
};

/// Errors returned by both clients
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionError {
    /// Rejected locally before any network call
    Validation(String),
    /// Non-success response; `details` is the boundary's JSON error payload
    IngestionRejected { status: u16, details: Value },
    /// Missing token, executable path or other setup problem
    Configuration(String),
    /// Serialization failures
    Internal(String),
    /// Connection or protocol failures
    Transport(String),
}

impl fmt::Display for SubmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionError::Validation(msg) => write!(f, "Validation failed: {}", msg),
            SubmissionError::IngestionRejected { status, details } => {
                write!(f, "Request rejected with status {}: {}", status, details)
            }
            SubmissionError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            SubmissionError::Internal(msg) => write!(f, "Internal error: {}", msg),
            SubmissionError::Transport(msg) => write!(f, "Transport error: {}", msg),
        }
    }
}

impl std::error::Error for SubmissionError {}

impl From<reqwest::Error> for SubmissionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SubmissionError::Internal(e.to_string())
        } else {
            SubmissionError::Transport(e.to_string())
        }
    }
}

impl SubmissionError {
    /// HTTP status the composer's own service answers with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SubmissionError::Validation(_) => StatusCode::BAD_REQUEST,
            SubmissionError::IngestionRejected { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            SubmissionError::Transport(_) => StatusCode::BAD_GATEWAY,
            SubmissionError::Configuration(_) | SubmissionError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Passes successful responses through and turns any other status into
/// `IngestionRejected`, keeping the body as JSON (or as a JSON string when
/// it isn't JSON).
async fn check_response_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, SubmissionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let details = serde_json::from_str(&body).unwrap_or(Value::String(body));
    Err(SubmissionError::IngestionRejected {
        status: status.as_u16(),
        details,
    })
}

fn build_http_client() -> Result<reqwest::Client, SubmissionError> {
    reqwest::Client::builder()
        .user_agent(concat!("usage-composer/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SubmissionError::Configuration(format!("failed to build HTTP client: {}", e)))
}
