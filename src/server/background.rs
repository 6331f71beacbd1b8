//! The background job server: worker pool, election and zookeeper wired
//! into one polling loop.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::dispatch::{DispatchError, StorageJobScheduler};
use super::election::ServerZooKeeper;
use super::handle::{COMMAND_CHANNEL_BUFFER, ServerHandle};
use super::status::ServerStatus;
use super::types::{ServerCommand, TickReport, ZooKeeperError};
use super::worker::{JobRunner, WorkerPool};
use super::zookeeper::JobZooKeeper;
use crate::config::{ConfigError, ServerConfig, YamlLoader};
use crate::core::details::JobDetails;
use crate::core::recurring::RecurringJob;
use crate::core::types::JobId;
use crate::filters::{JobFilter, JobFilters};
use crate::storage::{StorageError, StorageProvider};

/// A background job server.
///
/// # Example
///
/// ```no_run
/// use jobkeeper::{BackgroundJobServer, InMemoryStorageProvider, JobDetails};
/// use jobkeeper::testing::TestRunner;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = Arc::new(InMemoryStorageProvider::new());
/// let server = BackgroundJobServer::new(storage, Arc::new(TestRunner::succeeding()));
///
/// let (handle, task) = server.start()?;
/// server.enqueue(JobDetails::new("mail.Sender", "flush")).await?;
///
/// handle.shutdown().await?;
/// task.await?;
/// # Ok(())
/// # }
/// ```
pub struct BackgroundJobServer<S: StorageProvider> {
    storage: Arc<S>,
    runner: Arc<dyn JobRunner>,
    filters: JobFilters,
    config: ServerConfig,
    client: Arc<StorageJobScheduler<S>>,
}

impl<S: StorageProvider + 'static> BackgroundJobServer<S> {
    pub fn new(storage: Arc<S>, runner: Arc<dyn JobRunner>) -> Self {
        Self {
            client: Arc::new(StorageJobScheduler::new(Arc::clone(&storage))),
            storage,
            runner,
            filters: JobFilters::new(),
            config: ServerConfig::default(),
        }
    }

    /// Set the server configuration.
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a filter. Filters run in registration order.
    pub fn with_filter(mut self, filter: Arc<dyn JobFilter>) -> Self {
        self.filters = self.filters.with(filter);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Insert or replace a recurring job.
    pub async fn register_recurring_job(
        &self,
        recurring_job: RecurringJob,
    ) -> Result<(), StorageError> {
        info!(
            recurring_job_id = %recurring_job.id(),
            schedule = recurring_job.cron_expression(),
            timezone = recurring_job.schedule_offset(),
            "Registering recurring job"
        );
        self.storage.save_recurring_job(recurring_job).await
    }

    /// Create a job that is ready to run.
    pub async fn enqueue(&self, details: JobDetails) -> Result<JobId, DispatchError> {
        self.client.enqueue(details).await
    }

    /// Create a job due at `at`.
    pub async fn schedule(
        &self,
        details: JobDetails,
        at: DateTime<Utc>,
    ) -> Result<JobId, DispatchError> {
        self.client.schedule(details, at).await
    }

    /// Start the polling loop and return a handle for controlling it.
    ///
    /// Each start registers as a new server in the registry with a fresh
    /// worker pool.
    pub fn start(&self) -> Result<(ServerHandle, JoinHandle<()>), ConfigError> {
        YamlLoader::validate_server_config(&self.config)?;

        let status = Arc::new(ServerStatus::new(
            self.config.poll_interval(),
            self.config.worker_pool_size,
        ));
        let filters = Arc::new(self.filters.clone());
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&self.storage),
            Arc::clone(&filters),
            Arc::clone(&self.runner),
            status.id(),
            self.config.worker_pool_size,
            self.config.heartbeat_interval(),
        ));
        let jobs = JobZooKeeper::new(
            Arc::clone(&self.storage),
            Arc::clone(&status),
            filters,
            pool.clone(),
            self.client.clone(),
        )
        .with_config(self.config.zookeeper_config());
        let servers = ServerZooKeeper::new(
            Arc::clone(&self.storage),
            Arc::clone(&status),
            self.config.server_timeout(),
        );

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let handle = ServerHandle {
            command_tx,
            status: Arc::clone(&status),
        };

        let server_loop = ServerLoop {
            status,
            servers,
            jobs,
            pool,
            shutdown_timeout: self.config.shutdown_timeout(),
        };
        info!(
            server_id = %server_loop.status.id(),
            worker_pool_size = self.config.worker_pool_size,
            poll_interval = ?self.config.poll_interval(),
            "Background job server starting"
        );
        let task = tokio::spawn(server_loop.run(command_rx));

        Ok((handle, task))
    }
}

/// The parts owned by a started server.
struct ServerLoop<S: StorageProvider> {
    status: Arc<ServerStatus>,
    servers: ServerZooKeeper<S>,
    jobs: JobZooKeeper<S>,
    pool: Arc<WorkerPool<S>>,
    shutdown_timeout: Duration,
}

impl<S: StorageProvider + 'static> ServerLoop<S> {
    async fn run(self, mut command_rx: mpsc::Receiver<ServerCommand>) {
        let mut interval = tokio::time::interval(self.status.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(server_id = %self.status.id(), error = %e, "Zookeeper tick failed");
                    }
                }

                Some(command) = command_rx.recv() => {
                    match command {
                        ServerCommand::Tick { response } => {
                            let _ = response.send(self.tick().await);
                        }
                        ServerCommand::Pause { response } => {
                            if !self.status.pause() {
                                info!(server_id = %self.status.id(), "Server paused");
                            }
                            let _ = response.send(());
                        }
                        ServerCommand::Resume { response } => {
                            if self.status.resume() {
                                info!(server_id = %self.status.id(), "Server resumed");
                            }
                            let _ = response.send(());
                        }
                        ServerCommand::Shutdown { response } => {
                            self.stop().await;
                            let _ = response.send(());
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Heartbeat and election, then the job passes.
    async fn tick(&self) -> Result<TickReport, ZooKeeperError> {
        if let Err(e) = self.servers.run().await {
            // Without a heartbeat another server may already lead.
            self.status.set_leader(false);
            return Err(e.into());
        }
        self.jobs.run().await
    }

    async fn stop(&self) {
        info!(
            server_id = %self.status.id(),
            active_workers = self.pool.active_workers(),
            timeout = ?self.shutdown_timeout,
            "Background job server shutting down"
        );
        if !self.pool.shutdown(self.shutdown_timeout).await {
            warn!(server_id = %self.status.id(), "Shutdown timeout elapsed with jobs running");
        }
        if let Err(e) = self.servers.stop().await {
            error!(server_id = %self.status.id(), error = %e, "Could not deregister server");
        }
    }
}
