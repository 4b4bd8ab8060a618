use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;


/// Lifecycle of a backfill job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Status report sent by an execution backend.
///
/// Only the fields present are applied; absent fields keep their previous
/// value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusUpdate {
    pub job_id: String,
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_events: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_events: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatusUpdate {
    pub fn new(job_id: impl Into<String>, status: JobState) -> Self {
        Self {
            job_id: job_id.into(),
            status,
            progress: None,
            message: None,
            updated_at: None,
            total_events: None,
            processed_events: None,
            error: None,
        }
    }
}

/// Latest known snapshot of a job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: String,
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_events: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_events: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: String,
}

/// Status update rejections
#[derive(Debug, Clone, PartialEq)]
pub enum StatusError {
    MissingJobId,
    ProgressOutOfRange(f64),
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusError::MissingJobId => write!(f, "jobId is required"),
            StatusError::ProgressOutOfRange(p) => {
                write!(f, "progress must be between 0 and 100, got {}", p)
            }
        }
    }
}

impl std::error::Error for StatusError {}

/// In-memory store of the latest status per job id.
///
/// Lives for the life of the service process; nothing is persisted.
#[derive(Clone, Default)]
pub struct JobStatusRegistry {
    statuses: Arc<DashMap<String, JobStatus>>,
}

impl JobStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges an update into the stored snapshot and returns the result.
    pub fn apply(&self, update: JobStatusUpdate) -> Result<JobStatus, StatusError> {
        if update.job_id.trim().is_empty() {
            return Err(StatusError::MissingJobId);
        }
        if let Some(progress) = update.progress {
            if !(0.0..=100.0).contains(&progress) {
                return Err(StatusError::ProgressOutOfRange(progress));
            }
        }

        let updated_at = update
            .updated_at
            .clone()
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));

        let mut entry = self
            .statuses
            .entry(update.job_id.clone())
            .or_insert_with(|| JobStatus {
                job_id: update.job_id.clone(),
                status: update.status,
                progress: None,
                message: None,
                total_events: None,
                processed_events: None,
                error: None,
                updated_at: updated_at.clone(),
            });

        let status = entry.value_mut();
        status.status = update.status;
        status.updated_at = updated_at;
        if update.progress.is_some() {
            status.progress = update.progress;
        }
        if update.message.is_some() {
            status.message = update.message;
        }
        if update.total_events.is_some() {
            status.total_events = update.total_events;
        }
        if update.processed_events.is_some() {
            status.processed_events = update.processed_events;
        }
        if update.error.is_some() {
            status.error = update.error;
        }

        Ok(status.clone())
    }

    pub fn get(&self, job_id: &str) -> Option<JobStatus> {
        self.statuses.get(job_id).map(|s| s.clone())
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}

/// A backfill job as tracked by the composer's job list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillJob {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_events: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_events: Option<u64>,
}

/// Fields supplied when a job is added to the list.
#[derive(Clone, Debug, Default)]
pub struct NewJob {
    /// Id assigned by the backfill boundary; generated when absent
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub event_type: Option<String>,
}

/// Partial edit of a tracked job.
#[derive(Clone, Debug, Default)]
pub struct JobEdit {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub event_type: Option<String>,
}

/// Jobs submitted from this composer session, in submission order.
#[derive(Clone, Debug, Default)]
pub struct JobList {
    jobs: Vec<BackfillJob>,
}

impl JobList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> &[BackfillJob] {
        &self.jobs
    }

    pub fn get(&self, id: &str) -> Option<&BackfillJob> {
        self.jobs.iter().find(|job| job.id == id)
    }

    /// Adds a pending job and returns its id.
    pub fn add_job(&mut self, job: NewJob) -> String {
        let now = Utc::now();
        let id = job
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.jobs.push(BackfillJob {
            id: id.clone(),
            name: job.name,
            description: job.description,
            status: JobState::Pending,
            start_date: job.start_date,
            end_date: job.end_date,
            event_type: job.event_type,
            created_at: now,
            updated_at: now,
            progress: None,
            error: None,
            total_events: None,
            processed_events: None,
        });
        id
    }

    pub fn update_job(&mut self, id: &str, edit: JobEdit) -> bool {
        self.modify(id, |job| {
            if let Some(name) = edit.name {
                job.name = name;
            }
            if edit.description.is_some() {
                job.description = edit.description;
            }
            if edit.start_date.is_some() {
                job.start_date = edit.start_date;
            }
            if edit.end_date.is_some() {
                job.end_date = edit.end_date;
            }
            if edit.event_type.is_some() {
                job.event_type = edit.event_type;
            }
        })
    }

    pub fn update_job_status(&mut self, id: &str, status: JobState, error: Option<String>) -> bool {
        self.modify(id, |job| {
            job.status = status;
            job.error = error;
        })
    }

    /// Records progress as a whole percentage of `total_events`.
    pub fn update_job_progress(&mut self, id: &str, processed_events: u64, total_events: u64) -> bool {
        let progress = if total_events > 0 {
            (processed_events.min(total_events) * 100 / total_events) as u8
        } else {
            0
        };
        self.modify(id, |job| {
            job.progress = Some(progress);
            job.processed_events = Some(processed_events);
            job.total_events = Some(total_events);
        })
    }

    /// Folds a status report from the execution backend into the list.
    pub fn apply_status(&mut self, status: &JobStatus) -> bool {
        self.modify(&status.job_id, |job| {
            job.status = status.status;
            if status.error.is_some() {
                job.error = status.error.clone();
            }
            if let Some(progress) = status.progress {
                job.progress = Some(progress.clamp(0.0, 100.0) as u8);
            }
            if status.total_events.is_some() {
                job.total_events = status.total_events;
            }
            if status.processed_events.is_some() {
                job.processed_events = status.processed_events;
            }
        })
    }

    pub fn remove_job(&mut self, id: &str) -> bool {
        let before = self.jobs.len();
        self.jobs.retain(|job| job.id != id);
        self.jobs.len() != before
    }

    fn modify(&mut self, id: &str, f: impl FnOnce(&mut BackfillJob)) -> bool {
        match self.jobs.iter_mut().find(|job| job.id == id) {
            Some(job) => {
                f(job);
                job.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }
}
