use super::{build_http_client, check_response_status, SubmissionError};
use crate::config::UsageApiConfig;
use crate::event::IngestEvent;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.withorb.com";

/// Event the Usage API refused, with its reasons.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FailedEvent {
    pub idempotency_key: String,
    #[serde(default)]
    pub validation_errors: Vec<String>,
}

/// Outcome of one ingestion call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IngestResult {
    #[serde(default)]
    pub validation_failed: Vec<FailedEvent>,
    /// Present when ingesting with `debug=true`
    #[serde(default)]
    pub debug: Option<Value>,
}

/// Body of `POST /v1/events/backfills`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateBackfillRequest {
    pub timeframe_start: String,
    pub timeframe_end: String,
    pub external_customer_id: String,
    pub replace_existing_events: bool,
}

/// Upstream backfill resource.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Backfill {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub timeframe_start: Option<String>,
    #[serde(default)]
    pub timeframe_end: Option<String>,
    #[serde(default)]
    pub events_ingested: Option<u64>,
}

impl Backfill {
    /// Still open for ingestion or on its way to being reverted.
    pub fn is_pending(&self) -> bool {
        matches!(self.status.as_str(), "pending" | "pending_revert")
    }
}

#[derive(Debug, Deserialize)]
struct BackfillPage {
    #[serde(default)]
    data: Vec<Backfill>,
    #[serde(default)]
    pagination_metadata: Option<PaginationMetadata>,
}

#[derive(Debug, Deserialize)]
struct PaginationMetadata {
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// HTTP client for the Usage API.
///
/// Authenticates with a Bearer token. Every call is a single request; there
/// is no retry.
pub struct UsageApiClient {
    api_token: String,
    http_client: reqwest::Client,
    base_url: String,
    debug: bool,
}

impl UsageApiClient {
    /// Create a client using the default Usage API base URL.
    pub fn new(api_token: String) -> Result<Self, SubmissionError> {
        Self::with_base_url(api_token, DEFAULT_BASE_URL.to_string())
    }

    /// Create a client with a custom base URL (for testing with a mock server).
    pub fn with_base_url(api_token: String, base_url: String) -> Result<Self, SubmissionError> {
        if api_token.trim().is_empty() {
            return Err(SubmissionError::Configuration(
                "Usage API token is not set".to_string(),
            ));
        }
        Ok(Self {
            api_token,
            http_client: build_http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            debug: false,
        })
    }

    pub fn from_config(api_token: String, config: &UsageApiConfig) -> Result<Self, SubmissionError> {
        Ok(Self::with_base_url(api_token, config.base_url.clone())?.with_debug(config.debug))
    }

    /// Request the detailed ingestion report on plain ingestion calls.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Ingests events outside of any backfill and returns the raw response.
    pub async fn ingest(&self, events: &[IngestEvent]) -> Result<Value, SubmissionError> {
        let mut url = format!("{}/v1/ingest", self.base_url);
        if self.debug {
            url.push_str("?debug=true");
        }
        debug!(count = events.len(), "Ingesting events");

        let response = self.post(&url, &json!({ "events": events })).await?;
        Ok(response.json::<Value>().await?)
    }

    /// Ingests events into an open backfill.
    pub async fn ingest_into_backfill(
        &self,
        backfill_id: &str,
        events: &[IngestEvent],
    ) -> Result<IngestResult, SubmissionError> {
        let url = format!("{}/v1/ingest", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .query(&[("backfill_id", backfill_id)])
            .bearer_auth(&self.api_token)
            .json(&json!({ "events": events }))
            .send()
            .await?;

        let result = check_response_status(response)
            .await?
            .json::<IngestResult>()
            .await?;
        if !result.validation_failed.is_empty() {
            warn!(
                backfill_id = %backfill_id,
                failed = result.validation_failed.len(),
                "Usage API rejected events in batch"
            );
        }
        Ok(result)
    }

    pub async fn create_backfill(
        &self,
        request: &CreateBackfillRequest,
    ) -> Result<Backfill, SubmissionError> {
        let url = format!("{}/v1/events/backfills", self.base_url);
        let response = self.post(&url, request).await?;
        Ok(response.json::<Backfill>().await?)
    }

    pub async fn close_backfill(&self, backfill_id: &str) -> Result<Backfill, SubmissionError> {
        let url = format!("{}/v1/events/backfills/{}/close", self.base_url, backfill_id);
        let response = self.post(&url, &json!({})).await?;
        Ok(response.json::<Backfill>().await?)
    }

    pub async fn revert_backfill(&self, backfill_id: &str) -> Result<Backfill, SubmissionError> {
        let url = format!("{}/v1/events/backfills/{}/revert", self.base_url, backfill_id);
        let response = self.post(&url, &json!({})).await?;
        Ok(response.json::<Backfill>().await?)
    }

    /// Lists every backfill on the account, following pagination cursors.
    pub async fn list_backfills(&self) -> Result<Vec<Backfill>, SubmissionError> {
        let url = format!("{}/v1/events/backfills", self.base_url);
        let mut backfills = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = self.http_client.get(&url).bearer_auth(&self.api_token);
            if let Some(cursor) = &cursor {
                request = request.query(&[("cursor", cursor.as_str())]);
            }
            let page = check_response_status(request.send().await?)
                .await?
                .json::<BackfillPage>()
                .await?;
            backfills.extend(page.data);

            cursor = page
                .pagination_metadata
                .filter(|meta| meta.has_more)
                .and_then(|meta| meta.next_cursor);
            if cursor.is_none() {
                return Ok(backfills);
            }
        }
    }

    pub async fn fetch_backfill(&self, backfill_id: &str) -> Result<Backfill, SubmissionError> {
        let url = format!("{}/v1/events/backfills/{}", self.base_url, backfill_id);
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        Ok(check_response_status(response).await?.json::<Backfill>().await?)
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<reqwest::Response, SubmissionError> {
        let response = self
            .http_client
            .post(url)
            .bearer_auth(&self.api_token)
            .json(body)
            .send()
            .await?;
        check_response_status(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::Map;

    fn event(key: &str) -> IngestEvent {
        IngestEvent {
            idempotency_key: key.to_string(),
            external_customer_id: "cust-1".to_string(),
            event_name: "api_call".to_string(),
            properties: Map::new(),
            timestamp: "2024-03-01T12:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn test_missing_token_is_configuration_error() {
        let err = UsageApiClient::new("  ".to_string()).err().unwrap();
        assert!(matches!(err, SubmissionError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_ingest_with_debug() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/ingest?debug=true")
            .match_header("authorization", "Bearer test_token")
            .match_body(Matcher::Regex(r#""idempotency_key":"k1""#.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"validation_failed": [], "debug": {"duplicate": [], "ingested": ["k1"]}}"#)
            .create_async()
            .await;

        let client = UsageApiClient::with_base_url("test_token".to_string(), server.url())
            .unwrap()
            .with_debug(true);
        let response = client.ingest(&[event("k1")]).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response["debug"]["ingested"], json!(["k1"]));
    }

    #[tokio::test]
    async fn test_ingest_rejection_keeps_upstream_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/ingest")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"type": "validation_error", "title": "Bad timestamp"}"#)
            .create_async()
            .await;

        let client = UsageApiClient::with_base_url("test_token".to_string(), server.url()).unwrap();
        let err = client.ingest(&[event("k1")]).await.unwrap_err();

        assert_eq!(
            err,
            SubmissionError::IngestionRejected {
                status: 400,
                details: json!({"type": "validation_error", "title": "Bad timestamp"}),
            }
        );
    }

    #[tokio::test]
    async fn test_non_json_error_body_is_kept_as_text() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/events/backfills")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let client = UsageApiClient::with_base_url("test_token".to_string(), server.url()).unwrap();
        let request = CreateBackfillRequest {
            timeframe_start: "2024-03-01T00:00:00.000Z".to_string(),
            timeframe_end: "2024-03-02T00:00:00.000Z".to_string(),
            external_customer_id: "cust-1".to_string(),
            replace_existing_events: false,
        };
        let err = client.create_backfill(&request).await.unwrap_err();

        assert_eq!(
            err,
            SubmissionError::IngestionRejected {
                status: 502,
                details: json!("bad gateway"),
            }
        );
    }

    #[tokio::test]
    async fn test_backfill_lifecycle_calls() {
        let mut server = Server::new_async().await;
        let create = server
            .mock("POST", "/v1/events/backfills")
            .match_body(Matcher::Json(json!({
                "timeframe_start": "2024-03-01T00:00:00.000Z",
                "timeframe_end": "2024-03-04T00:00:00.000Z",
                "external_customer_id": "cust-1",
                "replace_existing_events": true
            })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "bf_1", "status": "pending"}"#)
            .create_async()
            .await;
        let ingest = server
            .mock("POST", "/v1/ingest?backfill_id=bf_1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"validation_failed": [{"idempotency_key": "k2", "validation_errors": ["bad"]}]}"#)
            .create_async()
            .await;
        let close = server
            .mock("POST", "/v1/events/backfills/bf_1/close")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "bf_1", "status": "pending_revert", "events_ingested": 2}"#)
            .create_async()
            .await;
        let revert = server
            .mock("POST", "/v1/events/backfills/bf_1/revert")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "bf_1", "status": "reverted"}"#)
            .create_async()
            .await;

        let client = UsageApiClient::with_base_url("test_token".to_string(), server.url()).unwrap();
        let backfill = client
            .create_backfill(&CreateBackfillRequest {
                timeframe_start: "2024-03-01T00:00:00.000Z".to_string(),
                timeframe_end: "2024-03-04T00:00:00.000Z".to_string(),
                external_customer_id: "cust-1".to_string(),
                replace_existing_events: true,
            })
            .await
            .unwrap();
        assert_eq!(backfill.id, "bf_1");

        let result = client
            .ingest_into_backfill(&backfill.id, &[event("k1"), event("k2")])
            .await
            .unwrap();
        assert_eq!(result.validation_failed.len(), 1);
        assert_eq!(result.validation_failed[0].idempotency_key, "k2");

        let closed = client.close_backfill("bf_1").await.unwrap();
        assert_eq!(closed.events_ingested, Some(2));
        let reverted = client.revert_backfill("bf_1").await.unwrap();
        assert_eq!(reverted.status, "reverted");

        create.assert_async().await;
        ingest.assert_async().await;
        close.assert_async().await;
        revert.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_backfills_follows_cursor() {
        let mut server = Server::new_async().await;
        let first = server
            .mock("GET", "/v1/events/backfills")
            .match_header("authorization", "Bearer test_token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data": [{"id": "bf_1", "status": "pending"}],
                    "pagination_metadata": {"has_more": true, "next_cursor": "c2"}}"#,
            )
            .create_async()
            .await;
        let second = server
            .mock("GET", "/v1/events/backfills?cursor=c2")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data": [{"id": "bf_2", "status": "reflected"}],
                    "pagination_metadata": {"has_more": false, "next_cursor": null}}"#,
            )
            .create_async()
            .await;

        let client = UsageApiClient::with_base_url("test_token".to_string(), server.url()).unwrap();
        let backfills = client.list_backfills().await.unwrap();

        assert_eq!(backfills.len(), 2);
        assert!(backfills[0].is_pending());
        assert!(!backfills[1].is_pending());
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_backfill() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/events/backfills/bf_1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "bf_1", "status": "reflected", "events_ingested": 40}"#)
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/v1/events/backfills/bf_9")
            .with_status(404)
            .with_header("content-type", "application/json")
            .with_body(r#"{"title": "Not found"}"#)
            .create_async()
            .await;

        let client = UsageApiClient::with_base_url("test_token".to_string(), server.url()).unwrap();
        let backfill = client.fetch_backfill("bf_1").await.unwrap();
        assert_eq!(backfill.status, "reflected");
        assert_eq!(backfill.events_ingested, Some(40));

        let err = client.fetch_backfill("bf_9").await.unwrap_err();
        assert!(matches!(
            err,
            SubmissionError::IngestionRejected { status: 404, .. }
        ));
    }
}
