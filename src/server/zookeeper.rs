//! The job zookeeper: periodic maintenance of the job store.
//!
//! Each call to [`JobZooKeeper::run`] is one tick. A tick runs six passes in
//! a fixed order, stopping at the first storage error:
//!
//! 1. spawn due recurring-job instances
//! 2. activate SCHEDULED jobs whose time has come
//! 3. hand ENQUEUED jobs to the workers
//! 4. retire SUCCEEDED jobs older than the succeeded retention
//! 5. purge DELETED jobs older than the deleted retention
//! 6. fail PROCESSING jobs whose heartbeat stopped
//!
//! Nothing runs unless this server is the leader and not paused.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::dispatch::{JobScheduler, WorkerDispatcher};
use super::status::ServerStatus;
use super::types::{DispatchMode, TickReport, ZooKeeperError};
use crate::core::job::Job;
use crate::core::recurring::RecurringJob;
use crate::core::state::{JobState, StateName};
use crate::filters::JobFilters;
use crate::storage::{PageRequest, StorageError, StorageProvider};

/// Page size of the maintenance passes.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Upper bound on pages a single pass processes per tick.
pub const DEFAULT_MAX_PAGES_PER_PASS: usize = 100;

/// States in which a recurring job counts as already outstanding, in the
/// order they are checked.
const OUTSTANDING_STATES: [StateName; 3] = [
    StateName::Scheduled,
    StateName::Enqueued,
    StateName::Processing,
];

pub(crate) const RETENTION_EXPIRED_REASON: &str = "Retention period of succeeded job expired";
pub(crate) const ORPHANED_REASON: &str = "Orphaned job: no heartbeat received";

/// Tunables of the maintenance passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZooKeeperConfig {
    /// How long a SUCCEEDED job is kept before it is moved to DELETED.
    pub succeeded_retention: Duration,
    /// How long a DELETED job is kept before it is removed.
    pub deleted_retention: Duration,
    /// A PROCESSING job without heartbeat for this long is failed.
    pub orphan_timeout: Duration,
    pub page_size: usize,
    pub max_pages_per_pass: usize,
}

impl Default for ZooKeeperConfig {
    fn default() -> Self {
        Self {
            succeeded_retention: Duration::from_secs(36 * 60 * 60),
            deleted_retention: Duration::from_secs(72 * 60 * 60),
            orphan_timeout: Duration::from_secs(60),
            page_size: DEFAULT_PAGE_SIZE,
            max_pages_per_pass: DEFAULT_MAX_PAGES_PER_PASS,
        }
    }
}

/// What a paged transition pass reads on every iteration.
#[derive(Debug, Clone, Copy)]
enum PageQuery {
    /// SCHEDULED jobs due at or before the instant.
    DueScheduled(DateTime<Utc>),
    /// Jobs in the state last updated at or before the instant.
    UpdatedBefore(StateName, DateTime<Utc>),
}

/// Periodic maintenance of the job store.
pub struct JobZooKeeper<S: StorageProvider> {
    storage: Arc<S>,
    status: Arc<ServerStatus>,
    filters: Arc<JobFilters>,
    dispatcher: Arc<dyn WorkerDispatcher>,
    scheduler: Arc<dyn JobScheduler>,
    config: ZooKeeperConfig,
}

impl<S: StorageProvider> JobZooKeeper<S> {
    pub fn new(
        storage: Arc<S>,
        status: Arc<ServerStatus>,
        filters: Arc<JobFilters>,
        dispatcher: Arc<dyn WorkerDispatcher>,
        scheduler: Arc<dyn JobScheduler>,
    ) -> Self {
        Self {
            storage,
            status,
            filters,
            dispatcher,
            scheduler,
            config: ZooKeeperConfig::default(),
        }
    }

    /// Replace the tunables.
    pub fn with_config(mut self, config: ZooKeeperConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ZooKeeperConfig {
        &self.config
    }

    /// Run one tick.
    ///
    /// The server status is read once up front. A follower or paused server
    /// returns [`TickReport::skipped`] without touching storage. Otherwise
    /// the first failing pass aborts the tick; work already saved by earlier
    /// passes stays saved.
    pub async fn run(&self) -> Result<TickReport, ZooKeeperError> {
        let status = self.status.snapshot();
        if !status.is_leader || status.is_paused {
            trace!(
                server_id = %status.id,
                is_leader = status.is_leader,
                is_paused = status.is_paused,
                "Skipping zookeeper tick"
            );
            return Ok(TickReport::skipped());
        }

        let now = Utc::now();
        let mut report = TickReport {
            ran: true,
            ..TickReport::default()
        };

        report.recurring_scheduled = self.check_for_recurring_jobs(now).await?;
        report.activated = self.check_for_scheduled_jobs(now).await?;
        let (mode, dispatched) = self.check_for_enqueued_jobs(status.worker_pool_size).await?;
        report.dispatch_mode = mode;
        report.dispatched = dispatched;
        report.retired = self.check_for_succeeded_jobs(now).await?;
        report.purged = self.delete_jobs_permanently(now).await?;
        report.orphaned = self.check_for_orphaned_jobs(now).await?;

        if report.total() > 0 {
            debug!(?report, "Zookeeper tick finished");
        }
        Ok(report)
    }

    /// Pass 1: schedule one instance of every recurring job that has none
    /// outstanding.
    async fn check_for_recurring_jobs(&self, now: DateTime<Utc>) -> Result<usize, ZooKeeperError> {
        let recurring_jobs = self.storage.get_recurring_jobs().await?;
        let mut scheduled = 0;

        for recurring_job in &recurring_jobs {
            if self.is_outstanding(recurring_job).await? {
                trace!(recurring_job_id = %recurring_job.id(), "Recurring job already outstanding");
                continue;
            }

            let job = match recurring_job.to_scheduled_job(now) {
                Ok(job) => job,
                Err(e) => {
                    warn!(
                        recurring_job_id = %recurring_job.id(),
                        error = %e,
                        "Recurring job has no next run"
                    );
                    continue;
                }
            };

            let job_id = self.scheduler.schedule_job(job).await?;
            debug!(
                recurring_job_id = %recurring_job.id(),
                job_id = %job_id,
                "Recurring job scheduled"
            );
            scheduled += 1;
        }

        Ok(scheduled)
    }

    /// Checks the outstanding states in order, stopping at the first hit.
    async fn is_outstanding(&self, recurring_job: &RecurringJob) -> Result<bool, StorageError> {
        for state in OUTSTANDING_STATES {
            if self.storage.exists(recurring_job.details(), state).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Pass 2: move due SCHEDULED jobs to ENQUEUED.
    async fn check_for_scheduled_jobs(&self, now: DateTime<Utc>) -> Result<usize, ZooKeeperError> {
        self.transition_pages(
            "scheduled",
            PageQuery::DueScheduled(now),
            |_| JobState::enqueued(),
            None,
        )
        .await
    }

    /// Pass 3: hand ENQUEUED jobs to the workers.
    ///
    /// Reads a single page sized to the worker pool. No transition happens
    /// here; workers claim jobs themselves.
    async fn check_for_enqueued_jobs(
        &self,
        worker_pool_size: usize,
    ) -> Result<(Option<DispatchMode>, usize), ZooKeeperError> {
        let jobs = self
            .storage
            .get_jobs(
                StateName::Enqueued,
                None,
                PageRequest::asc(0, worker_pool_size),
            )
            .await?;

        let count = jobs.len();
        if count == 0 {
            return Ok((None, 0));
        }

        if count <= worker_pool_size {
            for job in jobs {
                self.dispatcher.process_job(job)?;
            }
            debug!(count, "Dispatched enqueued jobs");
            Ok((Some(DispatchMode::NonBlocking), count))
        } else {
            self.dispatcher.process_jobs(jobs).await?;
            debug!(count, worker_pool_size, "Dispatched enqueued jobs as one batch");
            Ok((Some(DispatchMode::Blocking), count))
        }
    }

    /// Pass 4: move SUCCEEDED jobs past retention to DELETED and count them
    /// into the all-time succeeded counter.
    async fn check_for_succeeded_jobs(&self, now: DateTime<Utc>) -> Result<usize, ZooKeeperError> {
        let before = cutoff(now, self.config.succeeded_retention);
        self.transition_pages(
            "succeeded",
            PageQuery::UpdatedBefore(StateName::Succeeded, before),
            |_| JobState::deleted(RETENTION_EXPIRED_REASON),
            Some(StateName::Succeeded),
        )
        .await
    }

    /// Pass 5: physically remove DELETED jobs past retention. Filters are not
    /// notified.
    async fn delete_jobs_permanently(&self, now: DateTime<Utc>) -> Result<usize, ZooKeeperError> {
        let before = cutoff(now, self.config.deleted_retention);
        let purged = self.storage.delete_jobs(StateName::Deleted, before).await?;
        if purged > 0 {
            info!(count = purged, "Permanently deleted jobs");
        }
        Ok(purged)
    }

    /// Pass 6: fail PROCESSING jobs whose last heartbeat is too old.
    async fn check_for_orphaned_jobs(&self, now: DateTime<Utc>) -> Result<usize, ZooKeeperError> {
        let before = cutoff(now, self.config.orphan_timeout);
        self.transition_pages(
            "orphaned",
            PageQuery::UpdatedBefore(StateName::Processing, before),
            |_| JobState::failed(ORPHANED_REASON),
            None,
        )
        .await
    }

    async fn fetch(&self, query: PageQuery) -> Result<Vec<Job>, StorageError> {
        let page = PageRequest::asc(0, self.config.page_size);
        match query {
            PageQuery::DueScheduled(before) => self.storage.get_scheduled_jobs(before, page).await,
            PageQuery::UpdatedBefore(state, before) => {
                self.storage.get_jobs(state, Some(before), page).await
            }
        }
    }

    /// Transition pages of jobs until the query comes back empty.
    ///
    /// Every iteration re-reads from offset 0: the previous page no longer
    /// matches once saved. Each page is saved in one call, and when `counter`
    /// is set its size is published for that state. Stops after
    /// `max_pages_per_pass` pages; the rest is left for the next tick.
    async fn transition_pages(
        &self,
        pass: &'static str,
        query: PageQuery,
        next_state: impl Fn(&Job) -> JobState + Send + Sync,
        counter: Option<StateName>,
    ) -> Result<usize, ZooKeeperError> {
        let mut total = 0;

        for _ in 0..self.config.max_pages_per_pass {
            let mut jobs = self.fetch(query).await?;
            if jobs.is_empty() {
                return Ok(total);
            }

            self.filters.transition_all(&mut jobs, &next_state).await?;
            self.storage.save(&mut jobs).await?;
            if let Some(state) = counter {
                self.storage
                    .publish_job_stat_counter(state, jobs.len() as u64)
                    .await?;
            }

            total += jobs.len();
            debug!(pass, count = jobs.len(), "Processed page");
        }

        warn!(
            pass,
            max_pages = self.config.max_pages_per_pass,
            processed = total,
            "Page limit reached, continuing next tick"
        );
        Ok(total)
    }
}

/// `now - retention`, clamped to the earliest representable instant.
pub(crate) fn cutoff(now: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(retention)
        .ok()
        .and_then(|retention| now.checked_sub_signed(retention))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
