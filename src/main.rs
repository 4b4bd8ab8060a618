use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use usage_composer::api::{create_router, AppState};
use usage_composer::backfill::BackfillConfig;
use usage_composer::client::{SubmissionClient, UsageApiClient};
use usage_composer::composer::EventComposer;
use usage_composer::config::{load_config, ComposerConfig, EnvConfig};
use usage_composer::dispatch::{BackfillExecutor, ScriptExecutor};
use usage_composer::event::UsageEvent;
use usage_composer::jobs::JobStatusRegistry;
use usage_composer::runner::{load_job, BackfillRunner};

#[derive(Parser)]
#[command(name = "usage-composer", version, about = "Compose synthetic usage events and backfills")]
struct Cli {
    /// TOML configuration file
    #[arg(long, short = 'c', global = true, env = "COMPOSER_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the HTTP service
    Serve,
    /// Submit composed events through the service
    Send(SendArgs),
    /// Submit a backfill through the service
    Backfill(BackfillArgs),
    /// Execute a dispatched backfill job against the Usage API
    RunBackfill(RunBackfillArgs),
}

#[derive(Args)]
struct SendArgs {
    /// JSON file with one event template or an array of them
    #[arg(long)]
    template: PathBuf,
    /// Lookalikes to generate from the last template (max 20)
    #[arg(long, default_value_t = 0)]
    generate: usize,
    #[arg(long, env = "COMPOSER_URL", default_value = "http://localhost:3000")]
    service_url: String,
}

#[derive(Args)]
struct BackfillArgs {
    /// JSON file with the backfill configuration
    #[arg(long)]
    file: PathBuf,
    /// Validate and resolve only, nothing is executed
    #[arg(long)]
    test_mode: bool,
    #[arg(long, env = "COMPOSER_URL", default_value = "http://localhost:3000")]
    service_url: String,
}

#[derive(Args)]
struct RunBackfillArgs {
    /// Job file written by the service
    #[arg(long)]
    config_file: PathBuf,
    /// Service to report job status to
    #[arg(long, env = "COMPOSER_URL")]
    status_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "usage_composer=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let env = EnvConfig::from_env();
    let mut config = match &cli.config {
        Some(path) => load_config(&path.to_string_lossy())
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ComposerConfig::default(),
    };
    config.apply_env(&env);

    match cli.command {
        Cmd::Serve => serve(config, env).await,
        Cmd::Send(args) => send(args).await,
        Cmd::Backfill(args) => backfill(args).await,
        Cmd::RunBackfill(args) => run_backfill(args, config, env).await,
    }
}

async fn serve(config: ComposerConfig, env: EnvConfig) -> Result<()> {
    info!("Usage composer starting...");

    let registry = JobStatusRegistry::new();
    let mut state = AppState::new(registry.clone());
    state.backfill = config.backfill.clone();

    match env.usage_api_token {
        Some(token) => {
            let client = UsageApiClient::from_config(token, &config.usage_api)
                .context("Failed to create Usage API client")?;
            state.usage_api = Some(Arc::new(client));
        }
        None => warn!("USAGE_API_TOKEN is not set, event ingestion is disabled"),
    }

    match ScriptExecutor::from_settings(&config.backfill) {
        Ok(executor) => {
            let executor: Arc<dyn BackfillExecutor> = Arc::new(executor.with_registry(registry));
            state.executor = Some(executor);
        }
        Err(e) => warn!(error = %e, "Backfill execution is disabled"),
    }

    info!(
        bind_addr = %config.server.bind_addr,
        usage_api = %config.usage_api.base_url,
        work_dir = %config.backfill.work_dir.display(),
        "Configuration loaded"
    );

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "HTTP API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for ctrl_c signal");
            }
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server error")?;

    info!("Usage composer stopped");
    Ok(())
}

async fn send(args: SendArgs) -> Result<()> {
    let contents = read_file(&args.template)?;
    let events: Vec<UsageEvent> = match serde_json::from_str(&contents) {
        Ok(events) => events,
        Err(_) => vec![serde_json::from_str(&contents)
            .with_context(|| format!("Invalid event template in {}", args.template.display()))?],
    };

    let mut composer = EventComposer::with_events(events);
    composer.set_generated_event_count(args.generate);
    let batch = composer.build_batch(&mut StdRng::from_entropy())?;

    let client = SubmissionClient::new(args.service_url)?;
    let response = client.submit_events(&batch).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn backfill(args: BackfillArgs) -> Result<()> {
    let contents = read_file(&args.file)?;
    let mut config: BackfillConfig = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid backfill config in {}", args.file.display()))?;
    config.test_mode |= args.test_mode;

    let client = SubmissionClient::new(args.service_url)?;
    let response = client.submit_backfill(&config).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn run_backfill(args: RunBackfillArgs, config: ComposerConfig, env: EnvConfig) -> Result<()> {
    let job = load_job(&args.config_file)?;
    info!(
        job_id = %job.job_id,
        start_date = %job.start_date,
        end_date = %job.end_date,
        total_events = job.total_events(),
        "Running backfill job"
    );

    let token = env
        .usage_api_token
        .context("USAGE_API_TOKEN is required to run a backfill")?;
    let usage_api = UsageApiClient::from_config(token, &config.usage_api)?;

    let mut runner = BackfillRunner::new(usage_api, &config.backfill);
    if let Some(url) = args.status_url {
        runner = runner.with_status_reporting(SubmissionClient::new(url)?);
    }

    let summary = runner.run(&job, &mut StdRng::from_entropy()).await?;
    println!(
        "Backfill {} complete: {} events in {} backfills",
        job.job_id,
        summary.events_ingested,
        summary.backfill_ids.len()
    );
    Ok(())
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
