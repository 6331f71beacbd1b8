//! Job filters: ordered observers of every state transition.
//!
//! A transition runs in three steps: every filter's
//! [`JobFilter::on_state_election`] sees the job still in its old state
//! together with the elected state, the state is appended to the job's
//! history, then every filter's [`JobFilter::on_state_applied`] sees the job in
//! its new state together with the state it left. Filters run in registration
//! order and observe only; they cannot change the elected state.

mod logging;

pub use logging::LoggingFilter;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::core::job::Job;
use crate::core::state::JobState;
use crate::core::types::JobId;

/// A filter rejected or failed to observe a transition.
#[derive(Debug, Error)]
#[error("filter '{filter}' failed for job {job_id}: {message}")]
pub struct FilterError {
    pub filter: String,
    pub job_id: JobId,
    pub message: String,
}

impl FilterError {
    pub fn new(filter: impl Into<String>, job_id: JobId, message: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            job_id,
            message: message.into(),
        }
    }
}

/// Observer of job state transitions.
#[async_trait]
pub trait JobFilter: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Called before `new_state` is appended. `job` is still in its old state.
    async fn on_state_election(
        &self,
        _job: &Job,
        _new_state: &JobState,
    ) -> Result<(), FilterError> {
        Ok(())
    }

    /// Called after the state was appended. `job` is in its new state.
    async fn on_state_applied(&self, _job: &Job, _old_state: &JobState) -> Result<(), FilterError> {
        Ok(())
    }
}

/// The registered filters of one server, in invocation order.
#[derive(Clone, Default)]
pub struct JobFilters {
    filters: Vec<Arc<dyn JobFilter>>,
}

impl JobFilters {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter. Filters are invoked in the order they are added.
    pub fn with(mut self, filter: Arc<dyn JobFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Move `job` to `new_state`, notifying every filter.
    ///
    /// An election error leaves the job untouched. An applied error leaves
    /// the in-memory job in its new state; callers must not persist it.
    pub async fn transition(&self, job: &mut Job, new_state: JobState) -> Result<(), FilterError> {
        for filter in &self.filters {
            filter.on_state_election(job, &new_state).await?;
        }

        let old_state = job.state().clone();
        job.push_state(new_state);

        for filter in &self.filters {
            filter.on_state_applied(job, &old_state).await?;
        }

        tracing::trace!(
            job_id = %job.id(),
            from = %old_state.name(),
            to = %job.state_name(),
            "Job state transition applied"
        );
        Ok(())
    }

    /// Transition every job in slice order, stopping at the first error.
    pub async fn transition_all(
        &self,
        jobs: &mut [Job],
        next_state: impl Fn(&Job) -> JobState + Send,
    ) -> Result<(), FilterError> {
        for job in jobs.iter_mut() {
            let state = next_state(job);
            self.transition(job, state).await?;
        }
        Ok(())
    }
}
