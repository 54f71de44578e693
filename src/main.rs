mod api;
mod artifacts;
mod collaborators;
mod config;
mod events;
mod llm;
mod migrations;
mod paths;
mod phase;
mod prompts;
mod reaper;
mod recovery;
mod router;
mod store;
mod types;
mod worker;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use config::CliOverrides;
use events::EventBus;
use llm::{GuardedLlmClient, HttpBackend, LlmClient};
use prompts::PromptLibrary;
use reaper::Reaper;
use store::Store;
use types::NewJob;
use worker::WorkerPool;

#[derive(Parser)]
#[command(name = "cardigan", version, about = "Job scheduling and execution engine for the Cardigan editing pipeline")]
enum Cli {
    /// Run the worker pool and the control API together.
    Serve {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        db_path: Option<PathBuf>,
        #[arg(long)]
        prompts_dir: Option<PathBuf>,
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        max_concurrent_jobs: Option<usize>,
    },
    /// Enqueue a transcript from the command line.
    Submit {
        transcript_file: String,
        #[arg(long)]
        project_path: String,
        #[arg(long)]
        project_name: String,
        #[arg(long, default_value_t = 0)]
        priority: i32,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        db_path: Option<PathBuf>,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        include_timestamp: bool,
    },
    /// Show the status of a single job.
    Status {
        job_id: i64,
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Apply schema migrations and exit.
    Migrate {
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Print the merged configuration.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::from_default_env().add_directive("cardigan=info".parse().unwrap());
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn resolve_db_path(config: &config::CardiganConfig, override_path: &Option<PathBuf>) -> PathBuf {
    override_path.clone().unwrap_or_else(|| config.db_path.clone())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli {
        Cli::Serve { config, db_path, prompts_dir, bind, max_concurrent_jobs } => {
            cmd_serve(config, db_path, prompts_dir, bind, max_concurrent_jobs).await
        }
        Cli::Submit { transcript_file, project_path, project_name, priority, config, db_path, force, include_timestamp } => {
            cmd_submit(transcript_file, project_path, project_name, priority, config, db_path, force, include_timestamp).await
        }
        Cli::Status { job_id, db_path } => cmd_status(job_id, db_path).await,
        Cli::Migrate { db_path } => cmd_migrate(db_path).await,
        Cli::Config { config } => cmd_config(config).await,
    }
}

async fn cmd_serve(
    config_path: Option<PathBuf>,
    db_path: Option<PathBuf>,
    prompts_dir: Option<PathBuf>,
    bind: Option<String>,
    max_concurrent_jobs: Option<usize>,
) -> Result<()> {
    let cli_overrides = CliOverrides { db_path, prompts_dir, api_bind: bind, max_concurrent_jobs, run_cost_cap: None };
    let cfg = config::build_config(&config_path.unwrap_or_else(|| PathBuf::from("cardigan.toml")), &cli_overrides)?;

    println!("{}", "cardigan serve".bold().cyan());
    println!("  db:      {}", cfg.db_path.display());
    println!("  bind:    {}", cfg.api_bind);
    println!("  workers: {}", cfg.worker.max_concurrent_jobs);

    let store = Arc::new(Store::open(&cfg.db_path).with_context(|| format!("opening store at {}", cfg.db_path.display()))?);
    let events = EventBus::new(store.clone(), Some(cfg.db_path.with_file_name("logs")));
    let prompts = Arc::new(PromptLibrary::load(&cfg.prompts_dir)?);

    let api_key = std::env::var(&cfg.providers.api_key_env).unwrap_or_default();
    let backend = HttpBackend::new(
        cfg.providers.base_url.clone(),
        api_key,
        Duration::from_secs(cfg.providers.request_timeout_secs),
    );
    let tracer: Arc<dyn collaborators::TraceExporter> = Arc::new(collaborators::NullTraceExporter);
    let llm: Arc<dyn LlmClient> = Arc::new(GuardedLlmClient::new(backend, tracer));

    let routing = Arc::new(cfg.routing.clone());
    let safety = Arc::new(cfg.safety.clone());

    let pool = Arc::new(WorkerPool::new(
        store.clone(),
        events.clone(),
        llm,
        prompts,
        routing,
        safety,
        cfg.worker.clone(),
    ));

    let reaper = Arc::new(Reaper {
        store: store.clone(),
        events: events.clone(),
        check_interval: Duration::from_secs(cfg.worker.heartbeat_interval_seconds),
        stale_threshold: Duration::from_secs(cfg.worker.heartbeat_interval_seconds * cfg.worker.stale_threshold_multiplier),
    });

    let app_state = api::AppState { store: store.clone(), events: events.clone(), worker_pool: pool.clone() };
    let app = api::router(app_state);

    let listener = tokio::net::TcpListener::bind(&cfg.api_bind).await?;

    tokio::select! {
        _ = pool.clone().run() => {}
        _ = reaper.run() => {}
        res = axum::serve(listener, app) => {
            res?;
        }
    }

    Ok(())
}

async fn cmd_submit(
    transcript_file: String,
    project_path: String,
    project_name: String,
    priority: i32,
    config_path: Option<PathBuf>,
    db_path: Option<PathBuf>,
    force: bool,
    include_timestamp: bool,
) -> Result<()> {
    let cli_overrides = CliOverrides { db_path, prompts_dir: None, api_bind: None, max_concurrent_jobs: None, run_cost_cap: None };
    let cfg = config::build_config(&config_path.unwrap_or_else(|| PathBuf::from("cardigan.toml")), &cli_overrides)?;
    let store = Store::open(&cfg.db_path)?;

    let id = store
        .create_job(
            NewJob {
                transcript_file,
                project_path,
                project_name,
                priority,
                max_retries: 3,
                media_id: None,
                sst_record_id: None,
                include_timestamp,
            },
            force,
        )
        .await?;
    println!("{} job {id}", "queued".green());
    Ok(())
}

async fn cmd_status(job_id: i64, db_path: Option<PathBuf>) -> Result<()> {
    let cfg = config::build_config(&PathBuf::from("cardigan.toml"), &CliOverrides { db_path, ..Default::default() })?;
    let store = Store::open(&cfg.db_path)?;
    match store.get_job(job_id).await? {
        Some(job) => {
            println!("job {}: {}", job.id, job.status.to_string().bold());
            for phase in &job.phases {
                println!("  {:<14} {:<10} attempts={} cost=${:.4}", phase.name.as_str(), phase.status.as_str(), phase.attempts, phase.cost);
            }
        }
        None => println!("{}", format!("job {job_id} not found").red()),
    }
    Ok(())
}

async fn cmd_migrate(db_path: Option<PathBuf>) -> Result<()> {
    let cfg = config::build_config(&PathBuf::from("cardigan.toml"), &CliOverrides { db_path, ..Default::default() })?;
    Store::open(&cfg.db_path)?;
    println!("{}", "migrations applied".green());
    Ok(())
}

async fn cmd_config(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = config::build_config(&config_path.unwrap_or_else(|| PathBuf::from("cardigan.toml")), &CliOverrides::default())?;
    println!("{}", toml::to_string_pretty(&cfg).context("serializing config")?);
    Ok(())
}
