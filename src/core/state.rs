//! Job states and the entries of a job's state history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::types::ServerId;

const SCHEDULED_AT: &str = "scheduledAt";
const REASON: &str = "reason";
const SERVER_ID: &str = "serverId";

/// Name of a job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateName {
    /// Waiting for its due time.
    Scheduled,
    /// Due and waiting for a worker.
    Enqueued,
    /// Claimed and running on a worker.
    Processing,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error, or orphaned.
    Failed,
    /// Logically deleted; purged after retention.
    Deleted,
}

impl StateName {
    /// All state names, in lifecycle order.
    pub const ALL: [StateName; 6] = [
        StateName::Scheduled,
        StateName::Enqueued,
        StateName::Processing,
        StateName::Succeeded,
        StateName::Failed,
        StateName::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateName::Scheduled => "SCHEDULED",
            StateName::Enqueued => "ENQUEUED",
            StateName::Processing => "PROCESSING",
            StateName::Succeeded => "SUCCEEDED",
            StateName::Failed => "FAILED",
            StateName::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown state name.
#[derive(Debug, Error)]
#[error("unknown state name: {0}")]
pub struct UnknownStateName(String);

impl FromStr for StateName {
    type Err = UnknownStateName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StateName::ALL
            .into_iter()
            .find(|name| name.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStateName(s.to_string()))
    }
}

/// One entry in a job's state history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    name: StateName,
    created_at: DateTime<Utc>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl JobState {
    /// Create a state entry with no metadata.
    pub fn new(name: StateName) -> Self {
        Self {
            name,
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// A job waiting until `scheduled_at`.
    pub fn scheduled(scheduled_at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self::new(StateName::Scheduled)
            .with_metadata(SCHEDULED_AT, scheduled_at.to_rfc3339())
            .with_metadata(REASON, reason)
    }

    pub fn enqueued() -> Self {
        Self::new(StateName::Enqueued)
    }

    /// A job claimed by the given server.
    pub fn processing(server_id: ServerId) -> Self {
        Self::new(StateName::Processing).with_metadata(SERVER_ID, server_id.to_string())
    }

    pub fn succeeded() -> Self {
        Self::new(StateName::Succeeded)
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::new(StateName::Failed).with_metadata(REASON, reason)
    }

    pub fn deleted(reason: impl Into<String>) -> Self {
        Self::new(StateName::Deleted).with_metadata(REASON, reason)
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Override the creation timestamp.
    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn name(&self) -> StateName {
        self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Due time of a SCHEDULED state.
    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .get(SCHEDULED_AT)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn reason(&self) -> Option<&str> {
        self.metadata.get(REASON).map(String::as_str)
    }

    /// Server that claimed a PROCESSING job.
    pub fn server_id(&self) -> Option<&str> {
        self.metadata.get(SERVER_ID).map(String::as_str)
    }
}
