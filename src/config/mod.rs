pub mod runtime;
pub use runtime::EnvConfig;

use crate::backfill::policy::{DEFAULT_GRACE_DAYS, DEFAULT_LOOKBACK_DAYS};
use crate::backfill::{DateRangePolicy, DEFAULT_MAX_DAYS_PER_CHUNK};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::PathBuf;

/// Complete composer configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComposerConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub usage_api: UsageApiConfig,
    #[serde(default)]
    pub backfill: BackfillSettings,
}

/// HTTP service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Upstream Usage API. The token is never read from the file, only from
/// `USAGE_API_TOKEN`.
#[derive(Debug, Clone, Deserialize)]
pub struct UsageApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Ask the Usage API for a detailed ingestion report
    #[serde(default = "default_debug")]
    pub debug: bool,
}

fn default_base_url() -> String {
    "https://api.withorb.com".to_string()
}

fn default_debug() -> bool {
    true
}

impl Default for UsageApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            debug: default_debug(),
        }
    }
}

/// Backfill execution and date window
#[derive(Debug, Clone, Deserialize)]
pub struct BackfillSettings {
    /// Executable that runs a backfill job; dispatch fails without it
    #[serde(default)]
    pub script_path: Option<PathBuf>,
    /// Arguments placed before `--config-file`
    #[serde(default)]
    pub script_args: Vec<String>,
    /// Where per-job config files are written
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Events per ingestion call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_days_per_chunk")]
    pub max_days_per_chunk: u32,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_grace_days")]
    pub grace_days: i64,
    /// Revert upstream backfills left pending before a run starts
    #[serde(default = "default_revert_pending")]
    pub revert_pending: bool,
    /// Status checks while waiting for a backfill to settle
    #[serde(default = "default_status_poll_attempts")]
    pub status_poll_attempts: u32,
    #[serde(default = "default_status_poll_interval_ms")]
    pub status_poll_interval_ms: u64,
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_batch_size() -> usize {
    400
}

fn default_max_days_per_chunk() -> u32 {
    DEFAULT_MAX_DAYS_PER_CHUNK
}

fn default_lookback_days() -> i64 {
    DEFAULT_LOOKBACK_DAYS
}

fn default_grace_days() -> i64 {
    DEFAULT_GRACE_DAYS
}

fn default_revert_pending() -> bool {
    true
}

fn default_status_poll_attempts() -> u32 {
    30
}

fn default_status_poll_interval_ms() -> u64 {
    5000
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            script_path: None,
            script_args: Vec::new(),
            work_dir: default_work_dir(),
            batch_size: default_batch_size(),
            max_days_per_chunk: default_max_days_per_chunk(),
            lookback_days: default_lookback_days(),
            grace_days: default_grace_days(),
            revert_pending: default_revert_pending(),
            status_poll_attempts: default_status_poll_attempts(),
            status_poll_interval_ms: default_status_poll_interval_ms(),
        }
    }
}

impl BackfillSettings {
    /// Date policy anchored at `today`, or at the local date when `None`.
    pub fn date_policy(&self, today: Option<NaiveDate>) -> DateRangePolicy {
        let today = today.unwrap_or_else(|| chrono::Local::now().date_naive());
        DateRangePolicy::with_window(today, self.lookback_days, self.grace_days)
    }
}

impl ComposerConfig {
    /// Applies environment overrides on top of the file values.
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(url) = &env.usage_api_url {
            self.usage_api.base_url = url.clone();
        }
        if let Some(path) = &env.script_path {
            self.backfill.script_path = Some(path.clone());
        }
        if let Some(addr) = &env.bind_addr {
            self.server.bind_addr = addr.clone();
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<ComposerConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ComposerConfig = toml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ComposerConfig::default();
        assert_eq!(config.server.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.usage_api.base_url, "https://api.withorb.com");
        assert!(config.usage_api.debug);
        assert!(config.backfill.script_path.is_none());
        assert_eq!(config.backfill.batch_size, 400);
        assert_eq!(config.backfill.max_days_per_chunk, 10);
        assert_eq!(config.backfill.lookback_days, 90);
        assert_eq!(config.backfill.grace_days, 2);
        assert!(config.backfill.revert_pending);
        assert_eq!(config.backfill.status_poll_attempts, 30);
        assert_eq!(config.backfill.status_poll_interval_ms, 5000);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            bind_addr = "127.0.0.1:8080"

            [usage_api]
            base_url = "http://localhost:9000"
            debug = false

            [backfill]
            script_path = "/usr/local/bin/run-backfill"
            script_args = ["--verbose"]
            work_dir = "/var/tmp/backfills"
            batch_size = 100
            max_days_per_chunk = 5
            revert_pending = false
            status_poll_attempts = 4
            status_poll_interval_ms = 250
        "#;

        let config: ComposerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.usage_api.base_url, "http://localhost:9000");
        assert!(!config.usage_api.debug);
        assert_eq!(
            config.backfill.script_path,
            Some(PathBuf::from("/usr/local/bin/run-backfill"))
        );
        assert_eq!(config.backfill.script_args, vec!["--verbose".to_string()]);
        assert_eq!(config.backfill.work_dir, PathBuf::from("/var/tmp/backfills"));
        assert_eq!(config.backfill.batch_size, 100);
        assert_eq!(config.backfill.max_days_per_chunk, 5);
        assert!(!config.backfill.revert_pending);
        assert_eq!(config.backfill.status_poll_attempts, 4);
        assert_eq!(config.backfill.status_poll_interval_ms, 250);
        // unset fields keep their defaults
        assert_eq!(config.backfill.lookback_days, 90);
    }

    #[test]
    fn test_partial_config() {
        let config: ComposerConfig = toml::from_str("[usage_api]\ndebug = false\n").unwrap();
        assert!(!config.usage_api.debug);
        assert_eq!(config.usage_api.base_url, "https://api.withorb.com");
        assert_eq!(config.server.bind_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[backfill]\ngrace_days = 3").unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.backfill.grace_days, 3);

        assert!(load_config("/nonexistent/composer.toml").is_err());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = ComposerConfig::default();
        let env = EnvConfig {
            usage_api_token: Some("secret".to_string()),
            usage_api_url: Some("http://mock".to_string()),
            script_path: Some(PathBuf::from("/bin/true")),
            bind_addr: None,
        };

        config.apply_env(&env);
        assert_eq!(config.usage_api.base_url, "http://mock");
        assert_eq!(config.backfill.script_path, Some(PathBuf::from("/bin/true")));
        assert_eq!(config.server.bind_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_date_policy_uses_configured_window() {
        let settings = BackfillSettings {
            lookback_days: 30,
            grace_days: 0,
            ..Default::default()
        };
        let policy = settings.date_policy(None);
        assert_eq!(
            policy.maximum_date() - policy.minimum_date(),
            chrono::Duration::days(30)
        );

        let today = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let policy = settings.date_policy(Some(today));
        assert_eq!(policy.maximum_date(), today);
        assert_eq!(policy.minimum_date(), NaiveDate::from_ymd_opt(2024, 5, 16).unwrap());
    }
}
