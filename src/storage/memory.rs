//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for tests, benchmarks and
//! single-process deployments. Data is not persisted across restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::{JobStats, PageRequest, ServerRecord, StorageError, StorageProvider};
use crate::core::details::JobDetails;
use crate::core::job::Job;
use crate::core::recurring::RecurringJob;
use crate::core::state::StateName;
use crate::core::types::{JobId, RecurringJobId, ServerId};

/// In-memory storage backend.
///
/// Thread-safe storage using RwLock for concurrent access.
pub struct InMemoryStorageProvider {
    jobs: RwLock<HashMap<JobId, Job>>,
    recurring_jobs: RwLock<BTreeMap<RecurringJobId, RecurringJob>>,
    counters: RwLock<HashMap<StateName, u64>>,
    servers: RwLock<HashMap<ServerId, ServerRecord>>,
}

impl InMemoryStorageProvider {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            recurring_jobs: RwLock::new(BTreeMap::new()),
            counters: RwLock::new(HashMap::new()),
            servers: RwLock::new(HashMap::new()),
        }
    }

    /// Query jobs matching `filter`, sorted ascending by `key`, then paged.
    fn query<K: Ord>(
        &self,
        page: PageRequest,
        filter: impl Fn(&Job) -> bool,
        key: impl Fn(&Job) -> K,
    ) -> Result<Vec<Job>, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut matching: Vec<Job> = jobs.values().filter(|j| filter(j)).cloned().collect();
        matching.sort_by(|a, b| key(a).cmp(&key(b)).then_with(|| a.id().cmp(&b.id())));
        Ok(page.apply(matching))
    }
}

impl Default for InMemoryStorageProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageProvider for InMemoryStorageProvider {
    async fn get_recurring_jobs(&self) -> Result<Vec<RecurringJob>, StorageError> {
        let recurring = self
            .recurring_jobs
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(recurring.values().cloned().collect())
    }

    async fn save_recurring_job(&self, recurring_job: RecurringJob) -> Result<(), StorageError> {
        let mut recurring = self
            .recurring_jobs
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        recurring.insert(recurring_job.id().clone(), recurring_job);
        Ok(())
    }

    async fn exists(&self, details: &JobDetails, state: StateName) -> Result<bool, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(jobs
            .values()
            .any(|j| j.has_state(state) && j.details() == details))
    }

    async fn get_scheduled_jobs(
        &self,
        before: DateTime<Utc>,
        page: PageRequest,
    ) -> Result<Vec<Job>, StorageError> {
        self.query(
            page,
            |j| j.scheduled_at().is_some_and(|at| at <= before),
            |j| j.scheduled_at(),
        )
    }

    async fn get_jobs(
        &self,
        state: StateName,
        updated_before: Option<DateTime<Utc>>,
        page: PageRequest,
    ) -> Result<Vec<Job>, StorageError> {
        self.query(
            page,
            |j| j.has_state(state) && updated_before.is_none_or(|before| j.updated_at() <= before),
            |j| j.updated_at(),
        )
    }

    async fn get_job(&self, id: JobId) -> Result<Job, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        jobs.get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))
    }

    async fn count_jobs(&self, state: StateName) -> Result<u64, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(jobs.values().filter(|j| j.has_state(state)).count() as u64)
    }

    async fn save(&self, batch: &mut [Job]) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;

        // Validate the whole batch before touching anything.
        for job in batch.iter() {
            let stored_version = jobs.get(&job.id()).map(Job::version);
            let expected = stored_version.unwrap_or(0);
            if job.version() != expected {
                return Err(StorageError::ConcurrentModification(job.id()));
            }
        }

        for job in batch.iter_mut() {
            job.set_version(job.version() + 1);
            jobs.insert(job.id(), job.clone());
        }
        Ok(())
    }

    async fn delete_jobs(
        &self,
        state: StateName,
        updated_before: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        let before = jobs.len();
        jobs.retain(|_, j| !(j.has_state(state) && j.updated_at() <= updated_before));
        Ok(before - jobs.len())
    }

    async fn publish_job_stat_counter(
        &self,
        state: StateName,
        count: u64,
    ) -> Result<(), StorageError> {
        let mut counters = self
            .counters
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        *counters.entry(state).or_insert(0) += count;
        Ok(())
    }

    async fn job_stats(&self) -> Result<JobStats, StorageError> {
        let mut stats = JobStats::default();
        {
            let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
            for job in jobs.values() {
                *stats.by_state.entry(job.state_name()).or_insert(0) += 1;
            }
        }
        stats.all_time_succeeded = self
            .counters
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .get(&StateName::Succeeded)
            .copied()
            .unwrap_or(0);
        stats.recurring_jobs = self
            .recurring_jobs
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .len() as u64;
        stats.servers = self
            .servers
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .len() as u64;
        Ok(stats)
    }

    async fn announce_server(&self, server: ServerRecord) -> Result<(), StorageError> {
        let mut servers = self
            .servers
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        servers.insert(server.id, server);
        Ok(())
    }

    async fn signal_server_alive(&self, server: ServerRecord) -> Result<bool, StorageError> {
        let mut servers = self
            .servers
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        match servers.get_mut(&server.id) {
            Some(existing) => {
                existing.last_heartbeat = server.last_heartbeat;
                existing.running = server.running;
                existing.worker_pool_size = server.worker_pool_size;
                existing.poll_interval_secs = server.poll_interval_secs;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn signal_server_stopped(&self, id: ServerId) -> Result<(), StorageError> {
        let mut servers = self
            .servers
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        servers.remove(&id);
        Ok(())
    }

    async fn remove_timed_out_servers(
        &self,
        heartbeat_before: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let mut servers = self
            .servers
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let before = servers.len();
        servers.retain(|_, s| s.last_heartbeat > heartbeat_before);
        Ok(before - servers.len())
    }

    async fn get_longest_running_server_id(&self) -> Result<Option<ServerId>, StorageError> {
        let servers = self.servers.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(servers
            .values()
            .min_by(|a, b| {
                a.first_heartbeat
                    .cmp(&b.first_heartbeat)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|s| s.id))
    }

    async fn get_servers(&self) -> Result<Vec<ServerRecord>, StorageError> {
        let servers = self.servers.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = servers.values().cloned().collect();
        result.sort_by(|a, b| a.first_heartbeat.cmp(&b.first_heartbeat));
        Ok(result)
    }
}
