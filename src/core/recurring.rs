//! Recurring job templates.
//!
//! A recurring job never runs itself. Each time the zookeeper finds no
//! outstanding instance, it asks the template for a brand-new scheduled
//! [`Job`] at the next occurrence of the schedule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::details::JobDetails;
use super::job::Job;
use super::schedule::{Schedule, ScheduleError};
use super::types::RecurringJobId;

/// A template that spawns jobs on a cron schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringJob {
    id: RecurringJobId,
    details: JobDetails,
    schedule: Schedule,
}

impl RecurringJob {
    pub fn new(id: impl Into<RecurringJobId>, details: JobDetails, schedule: Schedule) -> Self {
        Self {
            id: id.into(),
            details,
            schedule,
        }
    }

    pub fn id(&self) -> &RecurringJobId {
        &self.id
    }

    /// The details every spawned instance carries.
    pub fn details(&self) -> &JobDetails {
        &self.details
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn cron_expression(&self) -> &str {
        self.schedule.expression()
    }

    /// Time zone the cron expression is evaluated in.
    pub fn schedule_offset(&self) -> &str {
        self.schedule.timezone()
    }

    pub fn next_run(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        self.schedule.next_after(from)
    }

    /// Build a new SCHEDULED job due at the next run after `from`.
    pub fn to_scheduled_job(&self, from: DateTime<Utc>) -> Result<Job, ScheduleError> {
        let at = self.next_run(from)?;
        Ok(Job::scheduled(
            self.details.clone(),
            at,
            format!("Scheduled by recurring job '{}'", self.id),
        ))
    }
}
