//! Job instances and their append-only state history.
//!
//! A `Job` is one unit of deferred work. Its lifecycle is recorded as a
//! sequence of [`JobState`] entries; the current state is always the last
//! entry. The `version` counter is owned by the storage layer, which bumps it
//! on every successful save and rejects saves carrying a stale version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::details::JobDetails;
use super::state::{JobState, StateName};
use super::types::JobId;

/// A job and its state history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "JobRecord")]
pub struct Job {
    id: JobId,
    details: JobDetails,
    history: Vec<JobState>,
    version: u64,
    updated_at: DateTime<Utc>,
}

/// Deserialized form of a job, checked before it becomes a [`Job`].
#[derive(Deserialize)]
struct JobRecord {
    id: JobId,
    details: JobDetails,
    history: Vec<JobState>,
    version: u64,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRecord> for Job {
    type Error = String;

    fn try_from(record: JobRecord) -> Result<Self, Self::Error> {
        if record.history.is_empty() {
            return Err(format!("job {} has an empty state history", record.id));
        }
        Ok(Self {
            id: record.id,
            details: record.details,
            history: record.history,
            version: record.version,
            updated_at: record.updated_at,
        })
    }
}

impl Job {
    /// Create a job whose first state is `initial`.
    pub fn new(details: JobDetails, initial: JobState) -> Self {
        Self::with_id(JobId::new(), details, initial)
    }

    /// Create a job with an explicit id.
    pub fn with_id(id: JobId, details: JobDetails, initial: JobState) -> Self {
        let updated_at = initial.created_at();
        Self {
            id,
            details,
            history: vec![initial],
            version: 0,
            updated_at,
        }
    }

    /// Create a job that is ready to run.
    pub fn enqueued(details: JobDetails) -> Self {
        Self::new(details, JobState::enqueued())
    }

    /// Create a job due at `at`.
    pub fn scheduled(details: JobDetails, at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self::new(details, JobState::scheduled(at, reason))
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn details(&self) -> &JobDetails {
        &self.details
    }

    /// The full state history, oldest first.
    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    /// The current state.
    pub fn state(&self) -> &JobState {
        // history is never empty: every constructor seeds it
        &self.history[self.history.len() - 1]
    }

    pub fn state_name(&self) -> StateName {
        self.state().name()
    }

    pub fn has_state(&self, name: StateName) -> bool {
        self.state_name() == name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Last time the job changed state or sent a heartbeat.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Due time, if the job is currently scheduled.
    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        if self.has_state(StateName::Scheduled) {
            self.state().scheduled_at()
        } else {
            None
        }
    }

    /// Append a new state. Callers outside the crate go through
    /// `JobFilters::transition` so that filters observe the change.
    pub(crate) fn push_state(&mut self, state: JobState) {
        self.updated_at = state.created_at().max(self.updated_at);
        self.history.push(state);
    }

    /// Refresh `updated_at` without changing state.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Override `updated_at`. Mainly useful for backends and tests that need
    /// to reconstruct a job as it was at a given time.
    pub fn set_updated_at(&mut self, updated_at: DateTime<Utc>) {
        self.updated_at = updated_at;
    }

    /// Set the persisted version. Only storage backends should call this.
    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
