//! Executes a resolved backfill against the Usage API.
//!
//! Backfills left pending by earlier runs are reverted first. The date range
//! is then split into chunks. Each chunk gets its own upstream backfill that
//! is created, filled in batches, closed and waited on until the Usage API
//! reports it reflected. A failure while filling reverts the chunk's
//! backfill; any failure stops the run. Chunks already reflected stay in
//! place.

use crate::backfill::{date_chunks, ResolvedBackfill};
use crate::client::{Backfill, CreateBackfillRequest, SubmissionClient, UsageApiClient};
use crate::config::BackfillSettings;
use crate::event::{format_utc, IngestEvent};
use crate::jobs::{JobState, JobStatusUpdate};
use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate, NaiveTime};
use rand::Rng;
use tracing::{debug, info, warn};


/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunSummary {
    /// Upstream backfill ids, one per non-empty chunk
    pub backfill_ids: Vec<String>,
    pub events_ingested: u64,
}

pub struct BackfillRunner {
    usage_api: UsageApiClient,
    status: Option<SubmissionClient>,
    batch_size: usize,
    max_days_per_chunk: u32,
    revert_pending: bool,
    /// Zero skips waiting on upstream status
    poll_attempts: u32,
    poll_interval: std::time::Duration,
}

impl BackfillRunner {
    pub fn new(usage_api: UsageApiClient, settings: &BackfillSettings) -> Self {
        Self {
            usage_api,
            status: None,
            batch_size: settings.batch_size.max(1),
            max_days_per_chunk: settings.max_days_per_chunk,
            revert_pending: settings.revert_pending,
            poll_attempts: settings.status_poll_attempts,
            poll_interval: std::time::Duration::from_millis(settings.status_poll_interval_ms),
        }
    }

    /// Report progress to the composer service while running.
    pub fn with_status_reporting(mut self, client: SubmissionClient) -> Self {
        self.status = Some(client);
        self
    }

    pub async fn run<R: Rng + ?Sized>(
        &self,
        job: &ResolvedBackfill,
        rng: &mut R,
    ) -> Result<RunSummary> {
        let total = job.total_events();
        let mut update = JobStatusUpdate::new(job.job_id.clone(), JobState::Processing);
        update.total_events = Some(total);
        update.processed_events = Some(0);
        update.progress = Some(0.0);
        self.report(update).await;

        match self.run_chunks(job, total, rng).await {
            Ok(summary) => {
                let mut update = JobStatusUpdate::new(job.job_id.clone(), JobState::Completed);
                update.processed_events = Some(summary.events_ingested);
                update.progress = Some(100.0);
                update.message = Some(format!(
                    "Ingested {} events in {} backfills",
                    summary.events_ingested,
                    summary.backfill_ids.len()
                ));
                self.report(update).await;
                info!(
                    job_id = %job.job_id,
                    events = summary.events_ingested,
                    backfills = summary.backfill_ids.len(),
                    "Backfill job completed"
                );
                Ok(summary)
            }
            Err(e) => {
                let mut update = JobStatusUpdate::new(job.job_id.clone(), JobState::Failed);
                update.error = Some(format!("{:#}", e));
                self.report(update).await;
                Err(e)
            }
        }
    }

    async fn run_chunks<R: Rng + ?Sized>(
        &self,
        job: &ResolvedBackfill,
        total: u64,
        rng: &mut R,
    ) -> Result<RunSummary> {
        if self.revert_pending {
            self.revert_pending_backfills().await?;
        }

        let mut summary = RunSummary::default();
        let chunks = date_chunks(job.start_date, job.end_date, self.max_days_per_chunk);

        for (index, (chunk_start, chunk_end)) in chunks.iter().enumerate() {
            let events = job
                .expand_between(*chunk_start, *chunk_end, rng)
                .context("Failed to generate events")?;
            if events.is_empty() {
                info!(job_id = %job.job_id, %chunk_start, %chunk_end, "No events for chunk, skipping");
                continue;
            }

            let backfill_id = self
                .ingest_chunk(job, *chunk_start, *chunk_end, &events)
                .await
                .with_context(|| {
                    format!(
                        "Chunk {}/{} ({} to {}) failed",
                        index + 1,
                        chunks.len(),
                        chunk_start,
                        chunk_end
                    )
                })?;

            summary.backfill_ids.push(backfill_id);
            summary.events_ingested += events.len() as u64;

            let mut update = JobStatusUpdate::new(job.job_id.clone(), JobState::Processing);
            update.processed_events = Some(summary.events_ingested);
            update.progress = Some(progress(summary.events_ingested, total));
            update.message = Some(format!("Chunk {}/{} reflected", index + 1, chunks.len()));
            self.report(update).await;
        }

        Ok(summary)
    }

    /// Creates, fills and closes one upstream backfill, then waits for it to
    /// be reflected. Reverts it when filling fails.
    async fn ingest_chunk(
        &self,
        job: &ResolvedBackfill,
        chunk_start: NaiveDate,
        chunk_end: NaiveDate,
        events: &[IngestEvent],
    ) -> Result<String> {
        let request = CreateBackfillRequest {
            timeframe_start: midnight_utc(chunk_start),
            timeframe_end: midnight_utc(chunk_end + Duration::days(1)),
            external_customer_id: job.external_customer_id.clone(),
            replace_existing_events: job.replace_existing_events,
        };
        let backfill = self
            .usage_api
            .create_backfill(&request)
            .await
            .context("Failed to create backfill")?;
        info!(
            job_id = %job.job_id,
            backfill_id = %backfill.id,
            timeframe_start = %request.timeframe_start,
            timeframe_end = %request.timeframe_end,
            events = events.len(),
            "Backfill created"
        );

        if let Err(e) = self.fill(&backfill.id, events).await {
            if let Err(revert_err) = self.usage_api.revert_backfill(&backfill.id).await {
                warn!(backfill_id = %backfill.id, error = %revert_err, "Failed to revert backfill");
            } else {
                warn!(backfill_id = %backfill.id, "Backfill reverted");
            }
            return Err(e);
        }

        self.usage_api
            .close_backfill(&backfill.id)
            .await
            .context("Failed to close backfill")?;
        info!(job_id = %job.job_id, backfill_id = %backfill.id, "Backfill closed");

        self.wait_until_reflected(&backfill.id).await?;
        Ok(backfill.id)
    }

    async fn wait_until_reflected(&self, backfill_id: &str) -> Result<()> {
        if self.poll_attempts == 0 {
            return Ok(());
        }

        for attempt in 1..=self.poll_attempts {
            match self.usage_api.fetch_backfill(backfill_id).await {
                Ok(backfill) => match backfill.status.as_str() {
                    "reflected" => {
                        info!(backfill_id = %backfill_id, attempt, "Backfill reflected");
                        return Ok(());
                    }
                    "failed" | "reverted" => {
                        bail!("Backfill {} ended with status {}", backfill_id, backfill.status)
                    }
                    status => {
                        debug!(backfill_id = %backfill_id, status = %status, attempt, "Waiting for backfill")
                    }
                },
                Err(e) => {
                    warn!(backfill_id = %backfill_id, attempt, error = %e, "Failed to check backfill status")
                }
            }
            if attempt < self.poll_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        bail!(
            "Timed out waiting for backfill {} to be reflected after {} checks",
            backfill_id,
            self.poll_attempts
        )
    }

    /// Reverts upstream backfills still open from earlier runs, then waits
    /// until none is pending.
    async fn revert_pending_backfills(&self) -> Result<()> {
        let backfills = self
            .usage_api
            .list_backfills()
            .await
            .context("Failed to list backfills")?;
        let pending: Vec<&Backfill> = backfills.iter().filter(|b| b.is_pending()).collect();
        if pending.is_empty() {
            return Ok(());
        }

        info!(count = pending.len(), "Reverting pending backfills before run");
        for backfill in pending.iter().filter(|b| b.status == "pending") {
            match self.usage_api.revert_backfill(&backfill.id).await {
                Ok(_) => info!(backfill_id = %backfill.id, "Pending backfill reverted"),
                Err(e) => {
                    warn!(backfill_id = %backfill.id, error = %e, "Failed to revert pending backfill")
                }
            }
        }
        if self.poll_attempts == 0 {
            return Ok(());
        }

        for attempt in 1..=self.poll_attempts {
            let backfills = self
                .usage_api
                .list_backfills()
                .await
                .context("Failed to list backfills")?;
            if !backfills.iter().any(Backfill::is_pending) {
                return Ok(());
            }
            if attempt < self.poll_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        bail!("Timed out waiting for pending backfills to be reverted")
    }

    async fn fill(&self, backfill_id: &str, events: &[IngestEvent]) -> Result<()> {
        for batch in events.chunks(self.batch_size) {
            let result = self
                .usage_api
                .ingest_into_backfill(backfill_id, batch)
                .await
                .context("Failed to ingest batch")?;

            if let Some(first) = result.validation_failed.first() {
                bail!(
                    "{} events failed validation (first: {} {:?})",
                    result.validation_failed.len(),
                    first.idempotency_key,
                    first.validation_errors
                );
            }
        }
        Ok(())
    }

    async fn report(&self, update: JobStatusUpdate) {
        let Some(client) = &self.status else {
            return;
        };
        if let Err(e) = client.report_status(&update).await {
            warn!(job_id = %update.job_id, error = %e, "Failed to report job status");
        }
    }
}

/// Reads a resolved job from the config file written by the dispatcher.
pub fn load_job(path: &std::path::Path) -> Result<ResolvedBackfill> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Invalid backfill config in {}", path.display()))
}

fn midnight_utc(date: NaiveDate) -> String {
    format_utc(date.and_time(NaiveTime::MIN).and_utc())
}

fn progress(processed: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (processed.min(total) as f64 / total as f64) * 100.0
}
