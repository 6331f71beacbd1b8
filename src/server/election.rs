//! Server registry heartbeat and leader election.
//!
//! Every server heartbeats into the shared registry. Servers that stop
//! heartbeating are removed after the server timeout, and the
//! longest-running live server is the leader. Only the leader runs the job
//! zookeeper's passes.

use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::status::ServerStatus;
use super::zookeeper::cutoff;
use crate::storage::{StorageError, StorageProvider};

/// Keeps this server registered and its leader flag current.
pub struct ServerZooKeeper<S: StorageProvider> {
    storage: Arc<S>,
    status: Arc<ServerStatus>,
    server_timeout: Duration,
    announced: AtomicBool,
}

impl<S: StorageProvider> ServerZooKeeper<S> {
    /// Servers silent for `server_timeout` are considered dead.
    pub fn new(storage: Arc<S>, status: Arc<ServerStatus>, server_timeout: Duration) -> Self {
        Self {
            storage,
            status,
            server_timeout,
            announced: AtomicBool::new(false),
        }
    }

    /// Heartbeat, evict dead servers and re-elect. Returns whether this
    /// server is the leader afterwards.
    pub async fn run(&self) -> Result<bool, StorageError> {
        let now = Utc::now();
        let record = self.status.to_record(now);

        if !self.announced.swap(true, Ordering::AcqRel) {
            self.storage.announce_server(record).await?;
            info!(server_id = %self.status.id(), "Server announced");
        } else if !self.storage.signal_server_alive(record.clone()).await? {
            warn!(server_id = %self.status.id(), "Server was evicted, announcing again");
            self.storage.announce_server(record).await?;
        }

        let removed = self
            .storage
            .remove_timed_out_servers(cutoff(now, self.server_timeout))
            .await?;
        if removed > 0 {
            info!(count = removed, "Removed timed out servers");
        }

        let leader = self.storage.get_longest_running_server_id().await? == Some(self.status.id());
        let was_leader = self.status.set_leader(leader);
        if was_leader != leader {
            info!(server_id = %self.status.id(), is_leader = leader, "Leadership changed");
        } else {
            debug!(server_id = %self.status.id(), is_leader = leader, "Server heartbeat");
        }
        Ok(leader)
    }

    /// Drop leadership and leave the registry.
    pub async fn stop(&self) -> Result<(), StorageError> {
        self.status.set_leader(false);
        self.storage.signal_server_stopped(self.status.id()).await?;
        self.announced.store(false, Ordering::Release);
        info!(server_id = %self.status.id(), "Server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ServerId;
    use crate::storage::InMemoryStorageProvider;
    use crate::testing::{ScriptedStorage, StorageCall};

    fn status() -> Arc<ServerStatus> {
        Arc::new(ServerStatus::new(Duration::from_secs(15), 4))
    }

    #[tokio::test]
    async fn test_first_run_announces_then_heartbeats() {
        let storage = Arc::new(ScriptedStorage::new());
        let status = status();
        let zookeeper = ServerZooKeeper::new(
            Arc::clone(&storage),
            Arc::clone(&status),
            Duration::from_secs(60),
        );

        zookeeper.run().await.unwrap();
        zookeeper.run().await.unwrap();

        let calls = storage.calls();
        assert_eq!(calls[0], StorageCall::AnnounceServer(status.id()));
        assert!(calls.contains(&StorageCall::SignalServerAlive(status.id())));
        assert_eq!(
            calls
                .iter()
                .filter(|c| matches!(c, StorageCall::AnnounceServer(_)))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_single_server_becomes_leader() {
        let storage = Arc::new(InMemoryStorageProvider::new());
        let status = status();
        let zookeeper = ServerZooKeeper::new(
            Arc::clone(&storage),
            Arc::clone(&status),
            Duration::from_secs(60),
        );

        assert!(zookeeper.run().await.unwrap());
        assert!(status.is_leader());
    }

    #[tokio::test]
    async fn test_oldest_server_wins() {
        let storage = Arc::new(InMemoryStorageProvider::new());
        let older = status();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let younger = status();
        let first = ServerZooKeeper::new(
            Arc::clone(&storage),
            Arc::clone(&older),
            Duration::from_secs(60),
        );
        let second = ServerZooKeeper::new(
            Arc::clone(&storage),
            Arc::clone(&younger),
            Duration::from_secs(60),
        );

        second.run().await.unwrap();
        first.run().await.unwrap();
        second.run().await.unwrap();

        assert!(older.is_leader());
        assert!(!younger.is_leader());
    }

    #[tokio::test]
    async fn test_leadership_passes_on_stop() {
        let storage = Arc::new(InMemoryStorageProvider::new());
        let older = status();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let younger = status();
        let first = ServerZooKeeper::new(
            Arc::clone(&storage),
            Arc::clone(&older),
            Duration::from_secs(60),
        );
        let second = ServerZooKeeper::new(
            Arc::clone(&storage),
            Arc::clone(&younger),
            Duration::from_secs(60),
        );
        first.run().await.unwrap();
        second.run().await.unwrap();

        first.stop().await.unwrap();
        second.run().await.unwrap();

        assert!(!older.is_leader());
        assert!(younger.is_leader());
    }

    #[tokio::test]
    async fn test_evicted_server_announces_again() {
        let storage = Arc::new(InMemoryStorageProvider::new());
        let status = status();
        let zookeeper = ServerZooKeeper::new(
            Arc::clone(&storage),
            Arc::clone(&status),
            Duration::from_secs(60),
        );
        zookeeper.run().await.unwrap();

        // Another server evicts everything that heartbeated before now.
        storage
            .remove_timed_out_servers(Utc::now())
            .await
            .unwrap();
        assert!(storage.get_servers().await.unwrap().is_empty());

        assert!(zookeeper.run().await.unwrap());
        let servers = storage.get_servers().await.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].id, status.id());
    }

    #[tokio::test]
    async fn test_dead_servers_are_removed() {
        let storage = Arc::new(InMemoryStorageProvider::new());
        let dead = ServerStatus::with_id(ServerId::new(), Duration::from_secs(15), 1);
        storage
            .announce_server(dead.to_record(Utc::now() - chrono::Duration::minutes(5)))
            .await
            .unwrap();
        let status = status();
        let zookeeper = ServerZooKeeper::new(
            Arc::clone(&storage),
            Arc::clone(&status),
            Duration::from_secs(60),
        );

        zookeeper.run().await.unwrap();

        let servers = storage.get_servers().await.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].id, status.id());
    }
}
