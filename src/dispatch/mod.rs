//! Hand-off of accepted backfill jobs to an execution backend.

use crate::backfill::ResolvedBackfill;
use crate::config::BackfillSettings;
use crate::jobs::{JobState, JobStatusRegistry, JobStatusUpdate};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{error, info, warn};


/// Executes accepted backfill jobs.
///
/// `dispatch` must return as soon as the job is handed off; progress is
/// reported separately through the status boundary.
#[async_trait]
pub trait BackfillExecutor: Send + Sync {
    async fn dispatch(&self, job: &ResolvedBackfill) -> Result<()>;
}

/// Runs an external executable once per job.
///
/// The resolved job is written to `{work_dir}/{jobId}_config.json` and the
/// executable is started as `{script_path} {script_args...} --config-file
/// {path}`. The file is removed once the process exits.
pub struct ScriptExecutor {
    script_path: PathBuf,
    script_args: Vec<String>,
    work_dir: PathBuf,
    registry: Option<JobStatusRegistry>,
}

impl ScriptExecutor {
    pub fn new(script_path: PathBuf, work_dir: PathBuf) -> Self {
        Self {
            script_path,
            script_args: Vec::new(),
            work_dir,
            registry: None,
        }
    }

    /// Builds an executor from settings; fails when no script is configured.
    pub fn from_settings(settings: &BackfillSettings) -> Result<Self> {
        let script_path = settings
            .script_path
            .clone()
            .ok_or_else(|| anyhow!("backfill script path is not configured"))?;
        Ok(Self::new(script_path, settings.work_dir.clone()).with_args(settings.script_args.clone()))
    }

    pub fn with_args(mut self, script_args: Vec<String>) -> Self {
        self.script_args = script_args;
        self
    }

    /// Marks jobs failed in `registry` when the script exits unsuccessfully.
    pub fn with_registry(mut self, registry: JobStatusRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config_path(&self, job_id: &str) -> PathBuf {
        self.work_dir.join(format!("{}_config.json", job_id))
    }
}

#[async_trait]
impl BackfillExecutor for ScriptExecutor {
    async fn dispatch(&self, job: &ResolvedBackfill) -> Result<()> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .with_context(|| format!("Failed to create work dir {}", self.work_dir.display()))?;

        let config_path = self.config_path(&job.job_id);
        let contents = serde_json::to_vec_pretty(job).context("Failed to serialize backfill job")?;
        tokio::fs::write(&config_path, contents)
            .await
            .with_context(|| format!("Failed to write {}", config_path.display()))?;

        let mut cmd = tokio::process::Command::new(&self.script_path);
        cmd.args(&self.script_args)
            .arg("--config-file")
            .arg(&config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                remove_config(&config_path).await;
                return Err(anyhow!(e).context(format!(
                    "Failed to start backfill script {}",
                    self.script_path.display()
                )));
            }
        };

        info!(
            job_id = %job.job_id,
            script = %self.script_path.display(),
            days = job.daily_counts.len(),
            "Backfill job dispatched"
        );

        let job_id = job.job_id.clone();
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let failure = match child.wait_with_output().await {
                Ok(output) => {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    if !stdout.trim().is_empty() {
                        info!(job_id = %job_id, output = %stdout.trim(), "Backfill script output");
                    }
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    if !stderr.trim().is_empty() {
                        warn!(job_id = %job_id, stderr = %stderr.trim(), "Backfill script stderr");
                    }
                    if output.status.success() {
                        info!(job_id = %job_id, "Backfill script finished");
                        None
                    } else {
                        Some(format!("backfill script exited with {}", output.status))
                    }
                }
                Err(e) => Some(format!("failed to wait for backfill script: {}", e)),
            };

            if let Some(message) = failure {
                error!(job_id = %job_id, error = %message, "Backfill job failed");
                if let Some(registry) = registry {
                    let mut update = JobStatusUpdate::new(job_id.clone(), JobState::Failed);
                    update.error = Some(message);
                    if let Err(e) = registry.apply(update) {
                        warn!(job_id = %job_id, error = %e, "Failed to record job failure");
                    }
                }
            }

            remove_config(&config_path).await;
        });

        Ok(())
    }
}

async fn remove_config(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove backfill config file");
        }
    }
}
