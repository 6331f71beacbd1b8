//! Storage abstraction for persisting jobs, recurring jobs and servers.
//!
//! The zookeeper treats storage as the single source of truth: every pass
//! re-reads what it needs and writes it back through [`StorageProvider::save`],
//! which is atomic per batch and guarded by each job's optimistic `version`.

mod memory;

pub use memory::InMemoryStorageProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::core::details::JobDetails;
use crate::core::job::Job;
use crate::core::recurring::RecurringJob;
use crate::core::state::StateName;
use crate::core::types::{JobId, ServerId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A job was modified by someone else since it was read.
    #[error("concurrent modification of job {0}")]
    ConcurrentModification(JobId),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

/// Sort direction of a paged query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    Asc,
    Desc,
}

/// A window into an ordered result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
    pub order: Order,
}

impl PageRequest {
    /// Oldest first.
    pub fn asc(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit,
            order: Order::Asc,
        }
    }

    /// Newest first.
    pub fn desc(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit,
            order: Order::Desc,
        }
    }

    /// Apply this page to an already ascending-sorted list.
    pub fn apply<T>(&self, mut sorted_asc: Vec<T>) -> Vec<T> {
        if self.order == Order::Desc {
            sorted_asc.reverse();
        }
        sorted_asc
            .into_iter()
            .skip(self.offset)
            .take(self.limit)
            .collect()
    }
}

/// Job counts per state plus the all-time succeeded counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    /// Jobs currently in each state.
    pub by_state: BTreeMap<StateName, u64>,
    /// Succeeded jobs already retired to DELETED, published via
    /// [`StorageProvider::publish_job_stat_counter`].
    pub all_time_succeeded: u64,
    pub recurring_jobs: u64,
    pub servers: u64,
}

impl JobStats {
    pub fn count(&self, state: StateName) -> u64 {
        self.by_state.get(&state).copied().unwrap_or(0)
    }
}

/// A background job server as seen by the server registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: ServerId,
    pub worker_pool_size: usize,
    pub poll_interval_secs: u64,
    pub first_heartbeat: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub running: bool,
}

/// Storage contract consumed by the job server.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    // Recurring jobs

    /// All recurring job templates.
    async fn get_recurring_jobs(&self) -> Result<Vec<RecurringJob>, StorageError>;

    /// Insert or replace a recurring job template.
    async fn save_recurring_job(&self, recurring_job: RecurringJob) -> Result<(), StorageError>;

    // Jobs

    /// Whether any job with these details is currently in `state`.
    async fn exists(&self, details: &JobDetails, state: StateName) -> Result<bool, StorageError>;

    /// SCHEDULED jobs due at or before `before`, ascending by due time.
    async fn get_scheduled_jobs(
        &self,
        before: DateTime<Utc>,
        page: PageRequest,
    ) -> Result<Vec<Job>, StorageError>;

    /// Jobs in `state`, optionally last updated at or before `updated_before`,
    /// ordered by `updated_at`.
    async fn get_jobs(
        &self,
        state: StateName,
        updated_before: Option<DateTime<Utc>>,
        page: PageRequest,
    ) -> Result<Vec<Job>, StorageError>;

    /// Get a job by ID.
    async fn get_job(&self, id: JobId) -> Result<Job, StorageError>;

    /// Number of jobs currently in `state`.
    async fn count_jobs(&self, state: StateName) -> Result<u64, StorageError>;

    /// Persist a batch of jobs, all or nothing.
    ///
    /// New jobs (version 0) are inserted; existing jobs must carry the version
    /// currently stored, otherwise the whole batch is rejected with
    /// [`StorageError::ConcurrentModification`]. On success every job in the
    /// slice has its version incremented.
    async fn save(&self, jobs: &mut [Job]) -> Result<(), StorageError>;

    /// Persist a single job.
    async fn save_job(&self, job: &mut Job) -> Result<(), StorageError> {
        self.save(std::slice::from_mut(job)).await
    }

    /// Physically remove jobs in `state` last updated at or before
    /// `updated_before`. Returns how many were removed.
    async fn delete_jobs(
        &self,
        state: StateName,
        updated_before: DateTime<Utc>,
    ) -> Result<usize, StorageError>;

    /// Add `count` to the persistent counter kept for `state`.
    async fn publish_job_stat_counter(&self, state: StateName, count: u64)
    -> Result<(), StorageError>;

    async fn job_stats(&self) -> Result<JobStats, StorageError>;

    // Server registry

    /// Register a server. Replaces any previous record with the same id.
    async fn announce_server(&self, server: ServerRecord) -> Result<(), StorageError>;

    /// Refresh a server's heartbeat. Returns `false` if the server is unknown,
    /// e.g. because it was removed after timing out.
    async fn signal_server_alive(&self, server: ServerRecord) -> Result<bool, StorageError>;

    /// Remove a server that is shutting down.
    async fn signal_server_stopped(&self, id: ServerId) -> Result<(), StorageError>;

    /// Remove servers whose last heartbeat is at or before `heartbeat_before`.
    async fn remove_timed_out_servers(
        &self,
        heartbeat_before: DateTime<Utc>,
    ) -> Result<usize, StorageError>;

    /// The server with the oldest first heartbeat, ties broken by id.
    async fn get_longest_running_server_id(&self) -> Result<Option<ServerId>, StorageError>;

    async fn get_servers(&self) -> Result<Vec<ServerRecord>, StorageError>;
}
