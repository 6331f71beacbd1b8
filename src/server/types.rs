//! Server type definitions.
//!
//! Error types, the per-tick report and the command type of the server loop.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use super::dispatch::DispatchError;
use crate::filters::FilterError;
use crate::storage::StorageError;

/// Errors that can occur while the server maintains jobs.
#[derive(Debug, Error)]
pub enum ZooKeeperError {
    /// Storage error. Aborts the remaining passes of a tick.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A filter failed during a transition.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// Jobs could not be handed to the worker pool or scheduler.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

/// How the enqueued-dispatch pass handed jobs to the workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DispatchMode {
    /// One non-blocking hand-off per job.
    NonBlocking,
    /// A single blocking hand-off of the whole batch.
    Blocking,
}

/// What a single zookeeper tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Whether the passes ran at all. False for followers and paused servers.
    pub ran: bool,
    /// Recurring-job instances handed to the job scheduler.
    pub recurring_scheduled: usize,
    /// SCHEDULED jobs moved to ENQUEUED.
    pub activated: usize,
    /// Set when enqueued jobs were dispatched.
    pub dispatch_mode: Option<DispatchMode>,
    /// Enqueued jobs handed to the workers.
    pub dispatched: usize,
    /// SUCCEEDED jobs moved to DELETED.
    pub retired: usize,
    /// DELETED jobs removed from storage.
    pub purged: usize,
    /// PROCESSING jobs without heartbeat moved to FAILED.
    pub orphaned: usize,
}

impl TickReport {
    /// Report of a tick that did nothing.
    pub fn skipped() -> Self {
        Self::default()
    }

    /// Total number of jobs touched.
    pub fn total(&self) -> usize {
        self.recurring_scheduled
            + self.activated
            + self.dispatched
            + self.retired
            + self.purged
            + self.orphaned
    }
}

/// Commands that can be sent to a running server.
pub(crate) enum ServerCommand {
    /// Run one maintenance tick now.
    Tick {
        response: oneshot::Sender<Result<TickReport, ZooKeeperError>>,
    },
    /// Pause maintenance.
    Pause { response: oneshot::Sender<()> },
    /// Resume maintenance.
    Resume { response: oneshot::Sender<()> },
    /// Stop the server.
    Shutdown { response: oneshot::Sender<()> },
}
