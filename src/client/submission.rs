use super::{build_http_client, check_response_status, SubmissionError};
use crate::backfill::{BackfillConfig, ResolvedBackfill};
use crate::event::IngestEvent;
use crate::jobs::{JobStatus, JobStatusUpdate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

/// Answer of `POST /api/send-events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEventsResponse {
    pub message: String,
    pub count: usize,
    #[serde(default)]
    pub usage_response: Value,
}

/// Answer of `POST /api/backfill`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Only in test mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ResolvedBackfill>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Answer of the status endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Client for the composer's own service.
///
/// One request per call. Failures come back as values; the caller decides
/// what to show and whether to retry.
pub struct SubmissionClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl SubmissionClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SubmissionError> {
        let base_url: String = base_url.into();
        Ok(Self {
            http_client: build_http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn submit_events(
        &self,
        events: &[IngestEvent],
    ) -> Result<SendEventsResponse, SubmissionError> {
        if events.is_empty() {
            return Err(SubmissionError::Validation("no events to submit".to_string()));
        }

        let url = format!("{}/api/send-events", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(&json!({ "events": events }))
            .send()
            .await?;

        let body = check_response_status(response)
            .await?
            .json::<SendEventsResponse>()
            .await?;
        info!(count = body.count, "Events submitted");
        Ok(body)
    }

    pub async fn submit_backfill(
        &self,
        config: &BackfillConfig,
    ) -> Result<BackfillResponse, SubmissionError> {
        let url = format!("{}/api/backfill", self.base_url);
        let response = self.http_client.post(&url).json(config).send().await?;

        let body = check_response_status(response)
            .await?
            .json::<BackfillResponse>()
            .await?;
        if let Some(job_id) = &body.job_id {
            info!(job_id = %job_id, test_mode = config.test_mode, "Backfill accepted");
        }
        Ok(body)
    }

    pub async fn report_status(
        &self,
        update: &JobStatusUpdate,
    ) -> Result<StatusResponse, SubmissionError> {
        let url = format!("{}/api/backfill/status", self.base_url);
        let response = self.http_client.post(&url).json(update).send().await?;

        Ok(check_response_status(response)
            .await?
            .json::<StatusResponse>()
            .await?)
    }

    pub async fn fetch_status(&self, job_id: &str) -> Result<StatusResponse, SubmissionError> {
        let url = format!("{}/api/backfill/status", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .query(&[("jobId", job_id)])
            .send()
            .await?;

        Ok(check_response_status(response)
            .await?
            .json::<StatusResponse>()
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobState;
    use mockito::{Matcher, Server};
    use serde_json::Map;

    fn event() -> IngestEvent {
        IngestEvent {
            idempotency_key: "k1".to_string(),
            external_customer_id: "cust-1".to_string(),
            event_name: "api_call".to_string(),
            properties: Map::new(),
            timestamp: "2024-03-01T12:00:00.000Z".to_string(),
        }
    }

    #[tokio::test]
    async fn test_submit_events() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/send-events")
            .match_body(Matcher::Regex(r#"^\{"events":\[\{"#.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"message": "Events processed successfully", "count": 1, "usageResponse": {"validation_failed": []}}"#,
            )
            .create_async()
            .await;

        let client = SubmissionClient::new(server.url()).unwrap();
        let response = client.submit_events(&[event()]).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.count, 1);
        assert_eq!(response.usage_response["validation_failed"], json!([]));
    }

    #[tokio::test]
    async fn test_submit_empty_batch_is_local_error() {
        let client = SubmissionClient::new("http://127.0.0.1:1").unwrap();
        let err = client.submit_events(&[]).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Validation(_)));
    }

    #[tokio::test]
    async fn test_rejection_carries_boundary_details() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/send-events")
            .with_status(422)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message": "Error from Usage API", "details": {"title": "duplicate"}}"#)
            .create_async()
            .await;

        let client = SubmissionClient::new(server.url()).unwrap();
        match client.submit_events(&[event()]).await.unwrap_err() {
            SubmissionError::IngestionRejected { status, details } => {
                assert_eq!(status, 422);
                assert_eq!(details["details"]["title"], "duplicate");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        let client = SubmissionClient::new("http://127.0.0.1:1").unwrap();
        let err = client.submit_events(&[event()]).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Transport(_)));
    }

    #[tokio::test]
    async fn test_submit_backfill() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/backfill")
            .match_body(Matcher::PartialJson(json!({"event_name": "api_call"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"success": true, "message": "Backfill job submitted successfully", "jobId": "job-1"}"#,
            )
            .create_async()
            .await;

        let client = SubmissionClient::new(server.url()).unwrap();
        let config = BackfillConfig {
            event_name: "api_call".to_string(),
            ..Default::default()
        };
        let response = client.submit_backfill(&config).await.unwrap();

        assert!(response.success);
        assert_eq!(response.job_id.as_deref(), Some("job-1"));
        assert!(response.config.is_none());
    }

    #[tokio::test]
    async fn test_report_and_fetch_status() {
        let mut server = Server::new_async().await;
        let report = server
            .mock("POST", "/api/backfill/status")
            .match_body(Matcher::PartialJson(json!({"jobId": "job-1", "status": "processing"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "data": {"jobId": "job-1", "status": "processing", "updatedAt": "2024-06-01T00:00:00.000Z"}}"#)
            .create_async()
            .await;
        let fetch = server
            .mock("GET", "/api/backfill/status?jobId=job-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "data": {"jobId": "job-1", "status": "completed", "progress": 100.0, "updatedAt": "2024-06-01T00:05:00.000Z"}}"#)
            .create_async()
            .await;

        let client = SubmissionClient::new(server.url()).unwrap();
        let reported = client
            .report_status(&JobStatusUpdate::new("job-1", JobState::Processing))
            .await
            .unwrap();
        assert!(reported.success);

        let fetched = client.fetch_status("job-1").await.unwrap();
        let data = fetched.data.unwrap();
        assert_eq!(data.status, JobState::Completed);
        assert_eq!(data.progress, Some(100.0));

        report.assert_async().await;
        fetch.assert_async().await;
    }
}
