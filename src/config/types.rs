//! Configuration type definitions.
//!
//! A configuration file holds the server settings and the recurring jobs the
//! server should keep registered:
//!
//! ```yaml
//! server:
//!   poll_interval_secs: 15
//!   worker_pool_size: 8
//! default_timezone: Europe/Brussels
//! recurring_jobs:
//!   - id: nightly-report
//!     schedule: "0 2 * * *"
//!     job:
//!       class: reports.Generator
//!       method: build
//!       parameters:
//!         - { class: String, value: weekly }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::server::ZooKeeperConfig;
use crate::server::zookeeper::{DEFAULT_MAX_PAGES_PER_PASS, DEFAULT_PAGE_SIZE};

/// Server and orphan timeouts default to this many poll intervals.
pub(crate) const DEFAULT_TIMEOUT_POLLS: u32 = 4;

pub(crate) const SECS_PER_HOUR: u64 = 3600;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    pub server: ServerConfig,
    /// Time zone for recurring jobs that do not name one. UTC when unset.
    pub default_timezone: Option<String>,
    pub recurring_jobs: Vec<RecurringJobConfig>,
}

/// Settings of one background job server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Seconds between two ticks.
    pub poll_interval_secs: u64,
    /// Maximum jobs running at once on this server.
    pub worker_pool_size: usize,
    /// Seconds between heartbeats of a running job. Defaults to the poll
    /// interval.
    pub heartbeat_interval_secs: Option<u64>,
    /// Seconds without server heartbeat before a server is evicted.
    /// Defaults to four poll intervals.
    pub server_timeout_secs: Option<u64>,
    /// Seconds without job heartbeat before a PROCESSING job is failed.
    /// Defaults to four poll intervals.
    pub orphan_timeout_secs: Option<u64>,
    pub succeeded_retention_hours: u64,
    pub deleted_retention_hours: u64,
    pub page_size: usize,
    pub max_pages_per_pass: usize,
    /// Seconds to wait for running jobs on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            worker_pool_size: 8,
            heartbeat_interval_secs: None,
            server_timeout_secs: None,
            orphan_timeout_secs: None,
            succeeded_retention_hours: 36,
            deleted_retention_hours: 72,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages_per_pass: DEFAULT_MAX_PAGES_PER_PASS,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.poll_interval())
    }

    pub fn server_timeout(&self) -> Duration {
        self.server_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.poll_interval().saturating_mul(DEFAULT_TIMEOUT_POLLS))
    }

    pub fn orphan_timeout(&self) -> Duration {
        self.orphan_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.poll_interval().saturating_mul(DEFAULT_TIMEOUT_POLLS))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Tunables for the job zookeeper.
    pub fn zookeeper_config(&self) -> ZooKeeperConfig {
        ZooKeeperConfig {
            succeeded_retention: hours(self.succeeded_retention_hours),
            deleted_retention: hours(self.deleted_retention_hours),
            orphan_timeout: self.orphan_timeout(),
            page_size: self.page_size,
            max_pages_per_pass: self.max_pages_per_pass,
        }
    }
}

/// Saturates at `Duration::MAX`; validation rejects values that would.
fn hours(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(SECS_PER_HOUR))
}

/// A recurring job definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringJobConfig {
    pub id: String,
    pub schedule: ScheduleConfig,
    pub job: JobDetailsConfig,
}

/// Schedule configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleConfig {
    /// Cron expression, shortcut or `@every` interval.
    Simple(String),
    /// Expression with an explicit time zone.
    Detailed {
        cron: String,
        timezone: Option<String>,
    },
}

impl ScheduleConfig {
    pub fn cron(&self) -> &str {
        match self {
            ScheduleConfig::Simple(s) => s,
            ScheduleConfig::Detailed { cron, .. } => cron,
        }
    }

    pub fn timezone(&self) -> Option<&str> {
        match self {
            ScheduleConfig::Simple(_) => None,
            ScheduleConfig::Detailed { timezone, .. } => timezone.as_deref(),
        }
    }
}

/// The method a recurring job invokes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetailsConfig {
    pub class: String,
    pub method: String,
    #[serde(default)]
    pub parameters: Vec<ParameterConfig>,
}

/// One argument. `value` is stored JSON-serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterConfig {
    pub class: String,
    pub value: serde_yaml::Value,
}
