//! Worker pool that runs enqueued jobs.
//!
//! A worker claims a job by moving it to PROCESSING and saving it. If the
//! save loses the optimistic version race another server claimed the job
//! first and the worker drops it. While the job runs the worker refreshes
//! its `updated_at` as a heartbeat, which keeps the orphan pass away.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, error, warn};

use super::dispatch::{DispatchError, WorkerDispatcher};
use crate::core::job::Job;
use crate::core::state::JobState;
use crate::core::types::{JobId, ServerId};
use crate::filters::JobFilters;
use crate::storage::{StorageError, StorageProvider};

/// Largest pool the worker semaphore can hold and `shutdown` can drain at
/// once.
pub const MAX_WORKER_POOL_SIZE: usize = if Semaphore::MAX_PERMITS < u32::MAX as usize {
    Semaphore::MAX_PERMITS
} else {
    u32::MAX as usize
};

/// A job's own failure, recorded as the FAILED state's reason.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct JobRunError {
    pub message: String,
}

impl JobRunError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Executes the work a job describes.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &Job) -> Result<(), JobRunError>;
}

/// A bounded pool of workers.
pub struct WorkerPool<S: StorageProvider> {
    inner: Arc<PoolInner<S>>,
}

struct PoolInner<S: StorageProvider> {
    storage: Arc<S>,
    filters: Arc<JobFilters>,
    runner: Arc<dyn JobRunner>,
    server_id: ServerId,
    size: usize,
    heartbeat_interval: Duration,
    semaphore: Arc<Semaphore>,
    in_flight: Mutex<HashSet<JobId>>,
}

/// Removes a job from the in-flight set when the worker is done with it,
/// including when the runner panics.
struct InFlight<S: StorageProvider> {
    pool: Arc<PoolInner<S>>,
    job_id: JobId,
}

impl<S: StorageProvider> Drop for InFlight<S> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.pool.in_flight.lock() {
            in_flight.remove(&self.job_id);
        }
    }
}

impl<S: StorageProvider + 'static> WorkerPool<S> {
    pub fn new(
        storage: Arc<S>,
        filters: Arc<JobFilters>,
        runner: Arc<dyn JobRunner>,
        server_id: ServerId,
        size: usize,
        heartbeat_interval: Duration,
    ) -> Self {
        let size = size.min(MAX_WORKER_POOL_SIZE);
        Self {
            inner: Arc::new(PoolInner {
                storage,
                filters,
                runner,
                server_id,
                size,
                heartbeat_interval,
                semaphore: Arc::new(Semaphore::new(size)),
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Workers currently busy.
    pub fn active_workers(&self) -> usize {
        self.inner
            .size
            .saturating_sub(self.inner.semaphore.available_permits())
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.semaphore.is_closed()
    }

    /// Stop accepting work and wait up to `timeout` for running jobs.
    ///
    /// Returns whether every worker finished in time. Jobs still running
    /// after the timeout keep running; if they never save a final state the
    /// orphan pass of some leader fails them later.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let semaphore = &self.inner.semaphore;
        let permits = u32::try_from(self.inner.size).unwrap_or(u32::MAX);
        let drained = tokio::time::timeout(timeout, semaphore.acquire_many(permits)).await;
        semaphore.close();

        let finished = matches!(drained, Ok(Ok(_)));
        if !finished {
            warn!(
                active = self.active_workers(),
                ?timeout,
                "Worker pool shut down with jobs still running"
            );
        }
        finished
    }

    /// Mark `job` in flight and return its guard, or `None` if a worker of
    /// this pool already has it.
    fn claim(&self, job: &Job) -> Option<InFlight<S>> {
        let mut in_flight = self.inner.in_flight.lock().ok()?;
        if !in_flight.insert(job.id()) {
            return None;
        }
        Some(InFlight {
            pool: Arc::clone(&self.inner),
            job_id: job.id(),
        })
    }

    fn spawn(&self, job: Job, permit: OwnedSemaphorePermit, guard: InFlight<S>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.perform(job).await;
            drop(permit);
            drop(guard);
        });
    }
}

#[async_trait]
impl<S: StorageProvider + 'static> WorkerDispatcher for WorkerPool<S> {
    fn process_job(&self, job: Job) -> Result<(), DispatchError> {
        if self.is_shut_down() {
            return Err(DispatchError::PoolClosed);
        }
        let Some(guard) = self.claim(&job) else {
            debug!(job_id = %job.id(), "Job already in flight");
            return Ok(());
        };

        match Arc::clone(&self.inner.semaphore).try_acquire_owned() {
            Ok(permit) => self.spawn(job, permit, guard),
            Err(TryAcquireError::Closed) => return Err(DispatchError::PoolClosed),
            Err(TryAcquireError::NoPermits) => {
                // Queue behind the busy workers without blocking the caller.
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    let Ok(permit) = Arc::clone(&inner.semaphore).acquire_owned().await else {
                        debug!(job_id = %job.id(), "Worker pool closed before job started");
                        return;
                    };
                    inner.perform(job).await;
                    drop(permit);
                    drop(guard);
                });
            }
        }
        Ok(())
    }

    async fn process_jobs(&self, jobs: Vec<Job>) -> Result<(), DispatchError> {
        for job in jobs {
            let Some(guard) = self.claim(&job) else {
                debug!(job_id = %job.id(), "Job already in flight");
                continue;
            };
            let permit = Arc::clone(&self.inner.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| DispatchError::PoolClosed)?;
            self.spawn(job, permit, guard);
        }
        Ok(())
    }
}

impl<S: StorageProvider> PoolInner<S> {
    /// Claim, run and finish one job. Errors are logged, never returned.
    async fn perform(&self, mut job: Job) {
        let job_id = job.id();

        if let Err(e) = self
            .filters
            .transition(&mut job, JobState::processing(self.server_id))
            .await
        {
            warn!(job_id = %job_id, error = %e, "Could not move job to processing");
            return;
        }
        match self.storage.save_job(&mut job).await {
            Ok(()) => {}
            Err(StorageError::ConcurrentModification(_)) => {
                debug!(job_id = %job_id, "Job claimed by another worker");
                return;
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Could not claim job");
                return;
            }
        }

        let next_state = match self.run_with_heartbeat(&mut job).await {
            Ok(()) => JobState::succeeded(),
            Err(e) => JobState::failed(e.message),
        };

        if let Err(e) = self.filters.transition(&mut job, next_state).await {
            error!(job_id = %job_id, error = %e, "Could not record job outcome");
            return;
        }
        if let Err(e) = self.storage.save_job(&mut job).await {
            error!(job_id = %job_id, error = %e, "Could not save job outcome");
        }
    }

    /// Run the job, saving a heartbeat every `heartbeat_interval` meanwhile.
    async fn run_with_heartbeat(&self, job: &mut Job) -> Result<(), JobRunError> {
        let snapshot = job.clone();
        let mut run = self.runner.run(&snapshot);

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                result = &mut run => return result,
                _ = heartbeat.tick() => {
                    job.touch();
                    if let Err(e) = self.storage.save_job(job).await {
                        warn!(job_id = %job.id(), error = %e, "Heartbeat failed");
                    }
                }
            }
        }
    }
}
