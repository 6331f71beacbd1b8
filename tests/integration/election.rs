//! Leader election integration tests.
//!
//! Several servers share one storage; only the longest-running live server
//! runs the maintenance passes.

use jobkeeper::testing::TestRunner;
use jobkeeper::{InMemoryStorageProvider, JobDetails, StateName, StorageProvider};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{server, wait_for_state};

#[tokio::test]
async fn test_only_oldest_server_leads() {
    let storage = Arc::new(InMemoryStorageProvider::new());
    let first = server(&storage, Arc::new(TestRunner::succeeding()));
    let second = server(&storage, Arc::new(TestRunner::succeeding()));

    let (leader, leader_task) = first.start().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let (follower, follower_task) = second.start().unwrap();

    assert!(leader.tick().await.unwrap().ran);
    let report = follower.tick().await.unwrap();

    assert!(!report.ran);
    assert_eq!(report.total(), 0);
    assert!(leader.is_leader());
    assert!(!follower.is_leader());
    assert_eq!(storage.get_servers().await.unwrap().len(), 2);

    follower.shutdown().await.unwrap();
    leader.shutdown().await.unwrap();
    follower_task.await.unwrap();
    leader_task.await.unwrap();
}

#[tokio::test]
async fn test_follower_takes_over_after_leader_stops() {
    let storage = Arc::new(InMemoryStorageProvider::new());
    let first = server(&storage, Arc::new(TestRunner::succeeding()));
    let second = server(&storage, Arc::new(TestRunner::succeeding()));

    let (leader, leader_task) = first.start().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let (follower, follower_task) = second.start().unwrap();
    leader.tick().await.unwrap();
    follower.tick().await.unwrap();

    leader.shutdown().await.unwrap();
    leader_task.await.unwrap();

    let id = second
        .enqueue(JobDetails::new("cleanup.Sweeper", "sweep"))
        .await
        .unwrap();
    let report = follower.tick().await.unwrap();

    assert!(report.ran);
    assert!(follower.is_leader());
    assert_eq!(report.dispatched, 1);
    wait_for_state(&*storage, id, StateName::Succeeded, Duration::from_secs(5)).await;

    let servers = storage.get_servers().await.unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].id, follower.status().id);

    follower.shutdown().await.unwrap();
    follower_task.await.unwrap();
}

#[tokio::test]
async fn test_paused_leader_keeps_leadership_but_skips_passes() {
    let storage = Arc::new(InMemoryStorageProvider::new());
    let server = server(&storage, Arc::new(TestRunner::succeeding()));
    let (handle, task) = server.start().unwrap();

    handle.tick().await.unwrap();
    handle.pause().await.unwrap();
    let id = server
        .enqueue(JobDetails::new("cleanup.Sweeper", "sweep"))
        .await
        .unwrap();

    let paused = handle.tick().await.unwrap();
    assert!(!paused.ran);
    assert!(handle.is_leader());
    assert_eq!(
        storage.get_job(id).await.unwrap().state_name(),
        StateName::Enqueued
    );

    handle.resume().await.unwrap();
    let resumed = handle.tick().await.unwrap();
    assert_eq!(resumed.dispatched, 1);
    wait_for_state(&*storage, id, StateName::Succeeded, Duration::from_secs(5)).await;

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}
