//! jobkeeper - background job scheduling with a leader-elected maintenance loop.
//!
//! Jobs move through SCHEDULED, ENQUEUED, PROCESSING, SUCCEEDED, FAILED and
//! DELETED. A fleet of [`BackgroundJobServer`]s shares one
//! [`StorageProvider`]; the longest-running server leads and runs the
//! [`JobZooKeeper`] passes that drive jobs between states.

pub mod config;
pub mod core;
pub mod filters;
pub mod server;
pub mod storage;
pub mod testing;

pub use config::{
    ConfigError, KeeperConfig, RecurringJobConfigBuilder, ServerConfig, YamlLoader,
    load_recurring_jobs_from_directory,
};
pub use core::details::{JobDetails, JobParameter};
pub use core::job::Job;
pub use core::recurring::RecurringJob;
pub use core::schedule::{Schedule, ScheduleError};
pub use core::state::{JobState, StateName};
pub use core::types::{JobId, RecurringJobId, ServerId};
pub use filters::{FilterError, JobFilter, JobFilters, LoggingFilter};
pub use server::{
    BackgroundJobServer, DispatchError, DispatchMode, JobRunError, JobRunner, JobScheduler,
    JobZooKeeper, ServerHandle, ServerStatus, ServerZooKeeper, StorageJobScheduler, TickReport,
    WorkerDispatcher, WorkerPool, ZooKeeperConfig, ZooKeeperError,
};
pub use storage::{
    InMemoryStorageProvider, JobStats, PageRequest, ServerRecord, StorageError, StorageProvider,
};
