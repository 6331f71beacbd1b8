//! Hand-off points between the zookeeper and the rest of the server.
//!
//! The zookeeper never runs jobs itself. Due work goes either to a
//! [`WorkerDispatcher`] ("execute now") or, for new recurring-job instances,
//! to a [`JobScheduler`] ("create and persist").

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::core::details::JobDetails;
use crate::core::job::Job;
use crate::core::types::JobId;
use crate::storage::{StorageError, StorageProvider};

/// Errors raised while handing jobs off.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The worker pool no longer accepts work.
    #[error("worker pool is shut down")]
    PoolClosed,

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Accepts enqueued jobs for execution.
#[async_trait]
pub trait WorkerDispatcher: Send + Sync {
    /// Hand over one job without waiting for a free worker.
    fn process_job(&self, job: Job) -> Result<(), DispatchError>;

    /// Hand over a batch, returning once every job is accepted by a worker.
    /// Completion of the jobs is not awaited.
    async fn process_jobs(&self, jobs: Vec<Job>) -> Result<(), DispatchError>;
}

/// Creates and persists new jobs.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    async fn schedule_job(&self, job: Job) -> Result<JobId, DispatchError>;
}

/// A [`JobScheduler`] that writes new jobs straight to storage.
///
/// Also serves as a minimal client: `enqueue` and `schedule` build the job
/// from its details.
pub struct StorageJobScheduler<S: StorageProvider> {
    storage: Arc<S>,
}

impl<S: StorageProvider> StorageJobScheduler<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Create a job that is ready to run.
    pub async fn enqueue(&self, details: JobDetails) -> Result<JobId, DispatchError> {
        self.schedule_job(Job::enqueued(details)).await
    }

    /// Create a job due at `at`.
    pub async fn schedule(
        &self,
        details: JobDetails,
        at: DateTime<Utc>,
    ) -> Result<JobId, DispatchError> {
        self.schedule_job(Job::scheduled(details, at, "Scheduled by client"))
            .await
    }
}

#[async_trait]
impl<S: StorageProvider> JobScheduler for StorageJobScheduler<S> {
    async fn schedule_job(&self, mut job: Job) -> Result<JobId, DispatchError> {
        self.storage.save_job(&mut job).await?;
        tracing::debug!(
            job_id = %job.id(),
            details = %job.details(),
            state = %job.state_name(),
            "Job created"
        );
        Ok(job.id())
    }
}
