//! jk - run a jobkeeper background job server.
//!
//! Usage:
//!   jk run <config>       Run a server with the recurring jobs from the config
//!   jk validate <config>  Validate a configuration without running
//!   jk list <config>      List the recurring jobs and their next runs

use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use jobkeeper::{
    BackgroundJobServer, InMemoryStorageProvider, Job, JobRunError, JobRunner, KeeperConfig,
    LoggingFilter, RecurringJob, RecurringJobConfigBuilder, StorageProvider, YamlLoader,
    load_recurring_jobs_from_directory,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// jk - background job server
#[derive(Parser)]
#[command(name = "jk")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a background job server
    Run {
        /// Path to the configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Directory with additional recurring job files
        #[arg(long, value_name = "DIR")]
        jobs_dir: Option<PathBuf>,

        /// Override the worker pool size
        #[arg(short = 'w', long)]
        workers: Option<usize>,

        /// Override the poll interval in seconds
        #[arg(long)]
        poll_interval: Option<u64>,
    },

    /// Validate a configuration without running
    Validate {
        /// Path to the configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Directory with additional recurring job files
        #[arg(long, value_name = "DIR")]
        jobs_dir: Option<PathBuf>,
    },

    /// List the recurring jobs of a configuration
    List {
        /// Path to the configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Directory with additional recurring job files
        #[arg(long, value_name = "DIR")]
        jobs_dir: Option<PathBuf>,
    },
}

/// Runner that logs each invocation and reports success.
struct LoggingRunner;

#[async_trait]
impl JobRunner for LoggingRunner {
    async fn run(&self, job: &Job) -> Result<(), JobRunError> {
        info!(job_id = %job.id(), details = %job.details(), "Running job");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            jobs_dir,
            workers,
            poll_interval,
        } => {
            run_server(config, jobs_dir, workers, poll_interval).await?;
        }
        Commands::Validate { config, jobs_dir } => {
            validate_config(config, jobs_dir)?;
        }
        Commands::List { config, jobs_dir } => {
            list_recurring_jobs(config, jobs_dir)?;
        }
    }

    Ok(())
}

/// Load the configuration and every recurring job it refers to.
fn load(
    config_path: &Path,
    jobs_dir: Option<&Path>,
) -> Result<(KeeperConfig, Vec<RecurringJob>), Box<dyn std::error::Error>> {
    let config = YamlLoader::load_config(config_path)?;
    let mut recurring_jobs = RecurringJobConfigBuilder::build_all(&config)?;
    if let Some(dir) = jobs_dir {
        recurring_jobs.extend(load_recurring_jobs_from_directory(
            dir,
            config.default_timezone.as_deref(),
        )?);
    }
    Ok((config, recurring_jobs))
}

/// Run a server until Ctrl+C.
async fn run_server(
    config_path: PathBuf,
    jobs_dir: Option<PathBuf>,
    workers: Option<usize>,
    poll_interval: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Loading configuration from: {}", config_path.display());
    let (config, recurring_jobs) = load(&config_path, jobs_dir.as_deref())?;

    let mut server_config = config.server;
    if let Some(workers) = workers {
        server_config.worker_pool_size = workers;
    }
    if let Some(secs) = poll_interval {
        server_config.poll_interval_secs = secs;
    }

    if recurring_jobs.is_empty() {
        warn!("No recurring jobs configured");
    }

    let storage = Arc::new(InMemoryStorageProvider::new());
    let server = BackgroundJobServer::new(Arc::clone(&storage), Arc::new(LoggingRunner))
        .with_config(server_config)
        .with_filter(Arc::new(LoggingFilter));

    for recurring_job in recurring_jobs {
        server.register_recurring_job(recurring_job).await?;
    }

    let (handle, server_task) = server.start()?;
    info!("Press Ctrl+C to stop");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            handle.shutdown().await?;
        }
        _ = server_task => {
            warn!("Server loop stopped");
        }
    }

    let stats = storage.job_stats().await?;
    info!(
        succeeded = stats.all_time_succeeded,
        jobs = ?stats.by_state,
        "Final job statistics"
    );
    Ok(())
}

/// Validate a configuration without running.
fn validate_config(
    config_path: PathBuf,
    jobs_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating: {}", config_path.display());

    match load(&config_path, jobs_dir.as_deref()) {
        Ok((_, recurring_jobs)) => {
            info!("Configuration is valid, {} recurring job(s):", recurring_jobs.len());
            for recurring_job in &recurring_jobs {
                info!("  - {}: OK", recurring_job.id());
            }
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e)
        }
    }
}

/// Print every recurring job with its next run.
fn list_recurring_jobs(
    config_path: PathBuf,
    jobs_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (_, recurring_jobs) = load(&config_path, jobs_dir.as_deref())?;

    if recurring_jobs.is_empty() {
        println!("No recurring jobs in {}", config_path.display());
        return Ok(());
    }

    let now = Utc::now();
    for recurring_job in &recurring_jobs {
        println!("ID: {}", recurring_job.id());
        println!("  Job: {}", recurring_job.details());
        println!(
            "  Schedule: {} ({})",
            recurring_job.cron_expression(),
            recurring_job.schedule_offset()
        );
        match recurring_job.next_run(now) {
            Ok(next) => println!("  Next run: {}", next.to_rfc3339()),
            Err(e) => println!("  Next run: none ({})", e),
        }
        println!();
    }

    Ok(())
}
