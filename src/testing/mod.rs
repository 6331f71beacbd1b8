//! Testing utilities for users of the jobkeeper library.
//!
//! - [`ScriptedStorage`]: a storage double that replays scripted pages and
//!   records every call
//! - [`RecordingFilter`], [`RecordingDispatcher`], [`RecordingScheduler`]:
//!   observers for the zookeeper's outputs
//! - [`TestRunner`]: a configurable [`JobRunner`]
//! - job builders for each state

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::core::details::JobDetails;
use crate::core::job::Job;
use crate::core::recurring::RecurringJob;
use crate::core::state::{JobState, StateName};
use crate::core::types::{JobId, RecurringJobId, ServerId};
use crate::filters::{FilterError, JobFilter};
use crate::server::{DispatchError, JobRunError, JobRunner, JobScheduler, WorkerDispatcher};
use crate::storage::{JobStats, PageRequest, ServerRecord, StorageError, StorageProvider};

/// Details shared by the job builders below.
pub fn test_details() -> JobDetails {
    JobDetails::new("test.Service", "work")
}

/// A job ready to run.
pub fn enqueued_job() -> Job {
    Job::enqueued(test_details())
}

/// A job due at `at`.
pub fn scheduled_job(at: DateTime<Utc>) -> Job {
    Job::scheduled(test_details(), at, "test")
}

/// A job claimed by a worker whose last heartbeat was at `updated_at`.
pub fn processing_job(updated_at: DateTime<Utc>) -> Job {
    let mut job = enqueued_job();
    job.push_state(JobState::processing(ServerId::new()).at(updated_at));
    job.set_updated_at(updated_at);
    job
}

/// A job that finished at `updated_at`.
pub fn succeeded_job(updated_at: DateTime<Utc>) -> Job {
    let mut job = processing_job(updated_at);
    job.push_state(JobState::succeeded().at(updated_at));
    job.set_updated_at(updated_at);
    job
}

/// A job retired at `updated_at`, waiting to be purged.
pub fn deleted_job(updated_at: DateTime<Utc>) -> Job {
    let mut job = succeeded_job(updated_at);
    job.push_state(JobState::deleted("test").at(updated_at));
    job.set_updated_at(updated_at);
    job
}

/// A call received by [`ScriptedStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCall {
    GetRecurringJobs,
    SaveRecurringJob(RecurringJobId),
    Exists(StateName),
    GetScheduledJobs {
        before: DateTime<Utc>,
        page: PageRequest,
    },
    GetJobs {
        state: StateName,
        updated_before: Option<DateTime<Utc>>,
        page: PageRequest,
    },
    GetJob(JobId),
    CountJobs(StateName),
    Save(Vec<JobId>),
    DeleteJobs {
        state: StateName,
        updated_before: DateTime<Utc>,
    },
    PublishJobStatCounter(StateName, u64),
    JobStats,
    AnnounceServer(ServerId),
    SignalServerAlive(ServerId),
    SignalServerStopped(ServerId),
    RemoveTimedOutServers,
    GetLongestRunningServerId,
    GetServers,
}

/// A storage double driven by scripted responses.
///
/// Every paged query pops the next scripted page for its state, or returns
/// an empty page once the script is exhausted. `exists` answers true for the
/// configured states. Every call is recorded in order.
#[derive(Default)]
pub struct ScriptedStorage {
    calls: Mutex<Vec<StorageCall>>,
    recurring_jobs: Vec<RecurringJob>,
    existing: HashSet<StateName>,
    scheduled_pages: Mutex<VecDeque<Vec<Job>>>,
    pages: Mutex<HashMap<StateName, VecDeque<Vec<Job>>>>,
    deleted_count: usize,
    fail_saves: bool,
    saved: Mutex<Vec<Vec<Job>>>,
    counters: Mutex<Vec<(StateName, u64)>>,
}

impl ScriptedStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recurring_job(mut self, recurring_job: RecurringJob) -> Self {
        self.recurring_jobs.push(recurring_job);
        self
    }

    /// Make `exists` return true for `state`, whatever the details.
    pub fn with_existing(mut self, state: StateName) -> Self {
        self.existing.insert(state);
        self
    }

    /// Queue a page for `get_scheduled_jobs`.
    pub fn with_scheduled_page(self, jobs: Vec<Job>) -> Self {
        self.scheduled_pages
            .lock()
            .expect("lock poisoned")
            .push_back(jobs);
        self
    }

    /// Queue a page for `get_jobs` on `state`.
    pub fn with_page(self, state: StateName, jobs: Vec<Job>) -> Self {
        self.pages
            .lock()
            .expect("lock poisoned")
            .entry(state)
            .or_default()
            .push_back(jobs);
        self
    }

    /// Number `delete_jobs` reports as removed.
    pub fn with_deleted_count(mut self, count: usize) -> Self {
        self.deleted_count = count;
        self
    }

    /// Make every `save` fail.
    pub fn failing_saves(mut self) -> Self {
        self.fail_saves = true;
        self
    }

    pub fn calls(&self) -> Vec<StorageCall> {
        self.calls.lock().expect("lock poisoned").clone()
    }

    /// States passed to `exists`, in call order.
    pub fn exists_checks(&self) -> Vec<StateName> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                StorageCall::Exists(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    /// Every batch passed to a successful `save`, as saved.
    pub fn saved_batches(&self) -> Vec<Vec<Job>> {
        self.saved.lock().expect("lock poisoned").clone()
    }

    pub fn published_counters(&self) -> Vec<(StateName, u64)> {
        self.counters.lock().expect("lock poisoned").clone()
    }

    fn record(&self, call: StorageCall) {
        self.calls.lock().expect("lock poisoned").push(call);
    }
}

#[async_trait]
impl StorageProvider for ScriptedStorage {
    async fn get_recurring_jobs(&self) -> Result<Vec<RecurringJob>, StorageError> {
        self.record(StorageCall::GetRecurringJobs);
        Ok(self.recurring_jobs.clone())
    }

    async fn save_recurring_job(&self, recurring_job: RecurringJob) -> Result<(), StorageError> {
        self.record(StorageCall::SaveRecurringJob(recurring_job.id().clone()));
        Ok(())
    }

    async fn exists(&self, _details: &JobDetails, state: StateName) -> Result<bool, StorageError> {
        self.record(StorageCall::Exists(state));
        Ok(self.existing.contains(&state))
    }

    async fn get_scheduled_jobs(
        &self,
        before: DateTime<Utc>,
        page: PageRequest,
    ) -> Result<Vec<Job>, StorageError> {
        self.record(StorageCall::GetScheduledJobs { before, page });
        Ok(self
            .scheduled_pages
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .pop_front()
            .unwrap_or_default())
    }

    async fn get_jobs(
        &self,
        state: StateName,
        updated_before: Option<DateTime<Utc>>,
        page: PageRequest,
    ) -> Result<Vec<Job>, StorageError> {
        self.record(StorageCall::GetJobs {
            state,
            updated_before,
            page,
        });
        Ok(self
            .pages
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .get_mut(&state)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default())
    }

    async fn get_job(&self, id: JobId) -> Result<Job, StorageError> {
        self.record(StorageCall::GetJob(id));
        Err(StorageError::NotFound(format!("job: {}", id)))
    }

    async fn count_jobs(&self, state: StateName) -> Result<u64, StorageError> {
        self.record(StorageCall::CountJobs(state));
        Ok(0)
    }

    async fn save(&self, jobs: &mut [Job]) -> Result<(), StorageError> {
        self.record(StorageCall::Save(jobs.iter().map(Job::id).collect()));
        if self.fail_saves {
            return Err(StorageError::Other("scripted save failure".into()));
        }
        for job in jobs.iter_mut() {
            job.set_version(job.version() + 1);
        }
        self.saved
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .push(jobs.to_vec());
        Ok(())
    }

    async fn delete_jobs(
        &self,
        state: StateName,
        updated_before: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        self.record(StorageCall::DeleteJobs {
            state,
            updated_before,
        });
        Ok(self.deleted_count)
    }

    async fn publish_job_stat_counter(
        &self,
        state: StateName,
        count: u64,
    ) -> Result<(), StorageError> {
        self.record(StorageCall::PublishJobStatCounter(state, count));
        self.counters
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .push((state, count));
        Ok(())
    }

    async fn job_stats(&self) -> Result<JobStats, StorageError> {
        self.record(StorageCall::JobStats);
        Ok(JobStats::default())
    }

    async fn announce_server(&self, server: ServerRecord) -> Result<(), StorageError> {
        self.record(StorageCall::AnnounceServer(server.id));
        Ok(())
    }

    async fn signal_server_alive(&self, server: ServerRecord) -> Result<bool, StorageError> {
        self.record(StorageCall::SignalServerAlive(server.id));
        Ok(true)
    }

    async fn signal_server_stopped(&self, id: ServerId) -> Result<(), StorageError> {
        self.record(StorageCall::SignalServerStopped(id));
        Ok(())
    }

    async fn remove_timed_out_servers(
        &self,
        _heartbeat_before: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        self.record(StorageCall::RemoveTimedOutServers);
        Ok(0)
    }

    async fn get_longest_running_server_id(&self) -> Result<Option<ServerId>, StorageError> {
        self.record(StorageCall::GetLongestRunningServerId);
        Ok(None)
    }

    async fn get_servers(&self) -> Result<Vec<ServerRecord>, StorageError> {
        self.record(StorageCall::GetServers);
        Ok(Vec::new())
    }
}

/// A filter that records applied transitions as `"FROM->TO"` together with
/// the job they applied to.
#[derive(Default)]
pub struct RecordingFilter {
    applied: Mutex<Vec<(JobId, String)>>,
}

impl RecordingFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transitions(&self) -> Vec<String> {
        self.records().into_iter().map(|(_, t)| t).collect()
    }

    /// Every applied transition in the order the filter saw it.
    pub fn records(&self) -> Vec<(JobId, String)> {
        self.applied.lock().expect("lock poisoned").clone()
    }

    /// Ids of the jobs that went through `transition`, in order.
    pub fn job_ids(&self, transition: &str) -> Vec<JobId> {
        self.records()
            .into_iter()
            .filter(|(_, t)| t == transition)
            .map(|(id, _)| id)
            .collect()
    }
}

#[async_trait]
impl JobFilter for RecordingFilter {
    fn name(&self) -> &str {
        "recording"
    }

    async fn on_state_applied(&self, job: &Job, old_state: &JobState) -> Result<(), FilterError> {
        self.applied
            .lock()
            .map_err(|_| FilterError::new("recording", job.id(), "lock poisoned"))?
            .push((
                job.id(),
                format!("{}->{}", old_state.name(), job.state_name()),
            ));
        Ok(())
    }
}

/// A dispatch received by [`RecordingDispatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchCall {
    Single(JobId),
    Batch(Vec<JobId>),
}

/// A worker dispatcher that only records what it is handed.
#[derive(Default)]
pub struct RecordingDispatcher {
    calls: Mutex<Vec<DispatchCall>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<DispatchCall> {
        self.calls.lock().expect("lock poisoned").clone()
    }

    /// Number of non-blocking single-job dispatches.
    pub fn single_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, DispatchCall::Single(_)))
            .count()
    }

    /// Sizes of the blocking batch dispatches.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.calls()
            .iter()
            .filter_map(|c| match c {
                DispatchCall::Batch(ids) => Some(ids.len()),
                DispatchCall::Single(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl WorkerDispatcher for RecordingDispatcher {
    fn process_job(&self, job: Job) -> Result<(), DispatchError> {
        self.calls
            .lock()
            .expect("lock poisoned")
            .push(DispatchCall::Single(job.id()));
        Ok(())
    }

    async fn process_jobs(&self, jobs: Vec<Job>) -> Result<(), DispatchError> {
        self.calls
            .lock()
            .expect("lock poisoned")
            .push(DispatchCall::Batch(jobs.iter().map(Job::id).collect()));
        Ok(())
    }
}

/// A job scheduler that keeps new jobs in memory instead of persisting them.
#[derive(Default)]
pub struct RecordingScheduler {
    jobs: Mutex<Vec<Job>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl JobScheduler for RecordingScheduler {
    async fn schedule_job(&self, job: Job) -> Result<JobId, DispatchError> {
        let id = job.id();
        self.jobs.lock().expect("lock poisoned").push(job);
        Ok(id)
    }
}

/// A job runner with a fixed outcome and optional delay.
///
/// # Example
///
/// ```
/// use jobkeeper::testing::TestRunner;
/// use std::time::Duration;
///
/// let runner = TestRunner::failing("boom").with_delay(Duration::from_millis(10));
/// assert!(runner.runs().is_empty());
/// ```
pub struct TestRunner {
    failure: Option<String>,
    delay: Duration,
    runs: Mutex<Vec<JobId>>,
}

impl TestRunner {
    /// A runner whose jobs always succeed.
    pub fn succeeding() -> Self {
        Self {
            failure: None,
            delay: Duration::ZERO,
            runs: Mutex::new(Vec::new()),
        }
    }

    /// A runner whose jobs always fail with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::succeeding()
        }
    }

    /// Sleep this long before finishing each job.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Jobs started so far, in start order.
    pub fn runs(&self) -> Vec<JobId> {
        self.runs.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl JobRunner for TestRunner {
    async fn run(&self, job: &Job) -> Result<(), JobRunError> {
        self.runs
            .lock()
            .map_err(|_| JobRunError::new("lock poisoned"))?
            .push(job.id());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.failure {
            Some(message) => Err(JobRunError::new(message.clone())),
            None => Ok(()),
        }
    }
}
