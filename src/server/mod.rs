//! The background job server.
//!
//! [`JobZooKeeper`] is the maintenance engine: on every tick the leader
//! schedules recurring jobs, activates due jobs, dispatches enqueued jobs to
//! the [`WorkerPool`] and cleans up finished and abandoned jobs.
//! [`ServerZooKeeper`] keeps the server registered and decides who leads.
//! [`BackgroundJobServer`] runs both on a polling loop.

mod background;
mod dispatch;
mod election;
mod handle;
mod status;
mod types;
mod worker;
pub(crate) mod zookeeper;

pub use background::BackgroundJobServer;
pub use dispatch::{DispatchError, JobScheduler, StorageJobScheduler, WorkerDispatcher};
pub use election::ServerZooKeeper;
pub use handle::ServerHandle;
pub use status::{ServerStatus, StatusSnapshot};
pub use types::{DispatchMode, TickReport, ZooKeeperError};
pub use worker::{JobRunError, JobRunner, MAX_WORKER_POOL_SIZE, WorkerPool};
pub use zookeeper::{
    DEFAULT_MAX_PAGES_PER_PASS, DEFAULT_PAGE_SIZE, JobZooKeeper, ZooKeeperConfig,
};
