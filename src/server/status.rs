//! Runtime status of one background job server.
//!
//! The configuration part is immutable for the server's lifetime. The two
//! runtime flags (leader, paused) live in a single atomic byte so that a
//! [`StatusSnapshot`] always reflects one consistent moment.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use crate::core::types::ServerId;
use crate::storage::ServerRecord;

const LEADER: u8 = 0b01;
const PAUSED: u8 = 0b10;

/// A consistent copy of the server status taken at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub id: ServerId,
    pub poll_interval: Duration,
    pub worker_pool_size: usize,
    pub is_leader: bool,
    pub is_paused: bool,
}

/// Thread-safe status of this server.
#[derive(Debug)]
pub struct ServerStatus {
    id: ServerId,
    poll_interval: Duration,
    worker_pool_size: usize,
    first_heartbeat: DateTime<Utc>,
    flags: AtomicU8,
}

impl ServerStatus {
    /// A new, running, non-leader server.
    pub fn new(poll_interval: Duration, worker_pool_size: usize) -> Self {
        Self::with_id(ServerId::new(), poll_interval, worker_pool_size)
    }

    pub fn with_id(id: ServerId, poll_interval: Duration, worker_pool_size: usize) -> Self {
        Self {
            id,
            poll_interval,
            worker_pool_size,
            first_heartbeat: Utc::now(),
            flags: AtomicU8::new(0),
        }
    }

    /// Read both flags at once together with the configuration.
    pub fn snapshot(&self) -> StatusSnapshot {
        let flags = self.flags.load(Ordering::Acquire);
        StatusSnapshot {
            id: self.id,
            poll_interval: self.poll_interval,
            worker_pool_size: self.worker_pool_size,
            is_leader: flags & LEADER != 0,
            is_paused: flags & PAUSED != 0,
        }
    }

    pub fn id(&self) -> ServerId {
        self.id
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool_size
    }

    pub fn first_heartbeat(&self) -> DateTime<Utc> {
        self.first_heartbeat
    }

    pub fn is_leader(&self) -> bool {
        self.snapshot().is_leader
    }

    pub fn is_paused(&self) -> bool {
        self.snapshot().is_paused
    }

    /// Set the leader flag. Returns the previous value.
    pub fn set_leader(&self, leader: bool) -> bool {
        self.set_flag(LEADER, leader)
    }

    /// Pause maintenance. Returns whether the server was already paused.
    pub fn pause(&self) -> bool {
        self.set_flag(PAUSED, true)
    }

    /// Resume maintenance. Returns whether the server was paused.
    pub fn resume(&self) -> bool {
        self.set_flag(PAUSED, false)
    }

    /// Registry record for a heartbeat sent at `now`.
    pub fn to_record(&self, now: DateTime<Utc>) -> ServerRecord {
        ServerRecord {
            id: self.id,
            worker_pool_size: self.worker_pool_size,
            poll_interval_secs: self.poll_interval.as_secs(),
            first_heartbeat: self.first_heartbeat,
            last_heartbeat: now,
            running: !self.is_paused(),
        }
    }

    fn set_flag(&self, bit: u8, on: bool) -> bool {
        let previous = if on {
            self.flags.fetch_or(bit, Ordering::AcqRel)
        } else {
            self.flags.fetch_and(!bit, Ordering::AcqRel)
        };
        previous & bit != 0
    }
}
