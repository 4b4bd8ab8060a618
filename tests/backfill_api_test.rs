// Integration tests for POST /api/backfill

use anyhow::anyhow;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use usage_composer::api::{create_router, AppState};
use usage_composer::backfill::ResolvedBackfill;
use usage_composer::dispatch::BackfillExecutor;
use usage_composer::jobs::{JobState, JobStatusRegistry};

/// Records dispatched jobs instead of running them.
#[derive(Default)]
struct RecordingExecutor {
    jobs: Mutex<Vec<ResolvedBackfill>>,
    fail: bool,
}

#[async_trait]
impl BackfillExecutor for RecordingExecutor {
    async fn dispatch(&self, job: &ResolvedBackfill) -> anyhow::Result<()> {
        if self.fail {
            return Err(anyhow!("spawn failed"));
        }
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }
}

fn create_test_app(
    executor: Option<Arc<RecordingExecutor>>,
    registry: JobStatusRegistry,
) -> Router {
    let mut state = AppState::new(registry);
    state.today = NaiveDate::from_ymd_opt(2024, 6, 15);
    state.executor = executor.map(|e| e as Arc<dyn BackfillExecutor>);
    create_router(state)
}

fn config() -> Value {
    json!({
        "event_name": "api_call",
        "external_customer_id": "cust-1",
        "start_date": "2024-05-01",
        "end_date": "2024-05-03",
        "events_per_day": {"type": "range", "min": 2, "max": 4},
        "properties": {
            "region": {"type": "set", "values": ["eu", "us"]},
            "request_id": {"useUUID": true},
            "plan": "pro"
        }
    })
}

async fn post(app: Router, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/backfill")
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

/// Test mode returns the resolved config and dispatches nothing.
#[tokio::test]
async fn test_test_mode_returns_resolved_config() {
    let executor = Arc::new(RecordingExecutor::default());
    let registry = JobStatusRegistry::new();
    let app = create_test_app(Some(executor.clone()), registry.clone());

    let mut body = config();
    body["test_mode"] = json!(true);
    body["backfill_customer_id"] = json!("cust-override");
    let (status, body) = post(app, body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Validation successful (test mode)");

    let job_id = body["jobId"].as_str().unwrap();
    assert!(uuid::Uuid::parse_str(job_id).is_ok());

    let resolved: ResolvedBackfill = serde_json::from_value(body["config"].clone()).unwrap();
    assert_eq!(resolved.job_id, job_id);
    assert_eq!(resolved.external_customer_id, "cust-override");
    assert_eq!(resolved.daily_counts.len(), 3);
    assert!(resolved.daily_counts.iter().all(|d| (2..=4).contains(&d.events)));
    assert_eq!(body["config"]["properties"]["request_id"], json!({"useUUID": true}));

    assert!(executor.jobs.lock().unwrap().is_empty());
    assert!(registry.is_empty());
}

/// A real submission is recorded as pending and handed to the executor.
#[tokio::test]
async fn test_submission_dispatches_job() {
    let executor = Arc::new(RecordingExecutor::default());
    let registry = JobStatusRegistry::new();
    let app = create_test_app(Some(executor.clone()), registry.clone());

    let (status, body) = post(app, config()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Backfill job submitted successfully");
    assert!(body.get("config").is_none());

    let job_id = body["jobId"].as_str().unwrap();
    let jobs = executor.jobs.lock().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_id, job_id);
    assert_eq!(jobs[0].start_date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());

    let pending = registry.get(job_id).unwrap();
    assert_eq!(pending.status, JobState::Pending);
    assert_eq!(pending.total_events, Some(jobs[0].total_events()));
}

/// Date policy violations come back as 400 with the policy message.
#[tokio::test]
async fn test_out_of_window_dates_are_rejected() {
    let executor = Arc::new(RecordingExecutor::default());

    let mut too_recent = config();
    too_recent["start_date"] = json!("2099-01-01");
    too_recent["end_date"] = json!("2099-01-02");
    let (status, body) = post(
        create_test_app(Some(executor.clone()), JobStatusRegistry::new()),
        too_recent,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("too recent"));

    let mut too_old = config();
    too_old["start_date"] = json!("2024-03-01");
    let (status, body) = post(
        create_test_app(Some(executor.clone()), JobStatusRegistry::new()),
        too_old,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("too far in the past"));

    let mut reversed = config();
    reversed["end_date"] = json!("2024-04-20");
    let (status, _) = post(
        create_test_app(Some(executor.clone()), JobStatusRegistry::new()),
        reversed,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(executor.jobs.lock().unwrap().is_empty());
}

/// The accepted window comes from the backfill settings.
#[tokio::test]
async fn test_configured_grace_period_is_applied() {
    let mut body = config();
    body["test_mode"] = json!(true);
    body["start_date"] = json!("2024-06-14");
    body["end_date"] = json!("2024-06-15");

    let (status, _) = post(create_test_app(None, JobStatusRegistry::new()), body.clone()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut state = AppState::new(JobStatusRegistry::new());
    state.today = NaiveDate::from_ymd_opt(2024, 6, 15);
    state.backfill.grace_days = 0;
    let (status, body) = post(create_router(state), body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"]["daily_counts"].as_array().unwrap().len(), 2);
}

/// Required fields and property constraints are checked.
#[tokio::test]
async fn test_invalid_configs_are_rejected() {
    let mut missing_name = config();
    missing_name["event_name"] = json!("");
    let (status, body) = post(create_test_app(None, JobStatusRegistry::new()), missing_name).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "event_name is required");

    let mut inverted = config();
    inverted["properties"]["latency"] = json!({"type": "range", "min": 9, "max": 1});
    let (status, _) = post(create_test_app(None, JobStatusRegistry::new()), inverted).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post(create_test_app(None, JobStatusRegistry::new()), json!([1, 2])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

/// Without an executor only test mode works.
#[tokio::test]
async fn test_missing_executor_is_configuration_error() {
    let (status, body) = post(create_test_app(None, JobStatusRegistry::new()), config()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Server configuration error");
}

/// A dispatch failure marks the job failed.
#[tokio::test]
async fn test_dispatch_failure_marks_job_failed() {
    let executor = Arc::new(RecordingExecutor {
        fail: true,
        ..Default::default()
    });
    let registry = JobStatusRegistry::new();
    let (status, body) = post(create_test_app(Some(executor), registry.clone()), config()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Internal server error");
    assert_eq!(registry.len(), 1);
}
