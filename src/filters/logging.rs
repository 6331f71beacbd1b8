//! A filter that logs every applied transition.

use async_trait::async_trait;
use tracing::{info, warn};

use super::{FilterError, JobFilter};
use crate::core::job::Job;
use crate::core::state::{JobState, StateName};

/// Logs applied transitions through `tracing`. Failures are logged at warn.
pub struct LoggingFilter;

#[async_trait]
impl JobFilter for LoggingFilter {
    fn name(&self) -> &str {
        "logging"
    }

    async fn on_state_applied(&self, job: &Job, old_state: &JobState) -> Result<(), FilterError> {
        let state = job.state();
        match state.name() {
            StateName::Failed => warn!(
                job_id = %job.id(),
                details = %job.details(),
                from = %old_state.name(),
                reason = state.reason().unwrap_or(""),
                "Job failed"
            ),
            to => info!(
                job_id = %job.id(),
                details = %job.details(),
                from = %old_state.name(),
                to = %to,
                "Job state changed"
            ),
        }
        Ok(())
    }
}
