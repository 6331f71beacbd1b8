//! Maintenance pass integration tests.
//!
//! Drive a single leader's zookeeper against in-memory storage and check
//! what ends up persisted.

use chrono::{Duration as ChronoDuration, Utc};
use jobkeeper::testing::{
    DispatchCall, RecordingDispatcher, RecordingFilter, ScriptedStorage, StorageCall, deleted_job,
    enqueued_job, processing_job, scheduled_job, succeeded_job,
};
use jobkeeper::{
    DispatchMode, InMemoryStorageProvider, JobDetails, JobFilters, JobZooKeeper, PageRequest,
    RecurringJob, Schedule, ServerStatus, StateName, StorageJobScheduler, StorageProvider,
    ZooKeeperConfig,
};
use std::sync::Arc;
use std::time::Duration;

use crate::common::seed;

struct Leader<S: StorageProvider> {
    storage: Arc<S>,
    filter: Arc<RecordingFilter>,
    dispatcher: Arc<RecordingDispatcher>,
    zookeeper: JobZooKeeper<S>,
}

fn leader<S: StorageProvider + 'static>(storage: S, worker_pool_size: usize) -> Leader<S> {
    let storage = Arc::new(storage);
    let status = Arc::new(ServerStatus::new(Duration::from_secs(15), worker_pool_size));
    status.set_leader(true);
    let filter = Arc::new(RecordingFilter::new());
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let zookeeper = JobZooKeeper::new(
        Arc::clone(&storage),
        status,
        Arc::new(JobFilters::new().with(filter.clone())),
        dispatcher.clone(),
        Arc::new(StorageJobScheduler::new(Arc::clone(&storage))),
    );
    Leader {
        storage,
        filter,
        dispatcher,
        zookeeper,
    }
}

#[tokio::test]
async fn test_one_recurring_job_yields_one_scheduled_job() {
    let leader = leader(InMemoryStorageProvider::new(), 10);
    let recurring = RecurringJob::new(
        "hourly-sync",
        JobDetails::new("sync.Remote", "pull"),
        Schedule::new("@hourly").unwrap(),
    );
    leader.storage.save_recurring_job(recurring.clone()).await.unwrap();

    let first = leader.zookeeper.run().await.unwrap();
    let second = leader.zookeeper.run().await.unwrap();

    assert_eq!(first.recurring_scheduled, 1);
    // The first instance is still outstanding.
    assert_eq!(second.recurring_scheduled, 0);

    let scheduled = leader
        .storage
        .get_jobs(StateName::Scheduled, None, PageRequest::asc(0, 10))
        .await
        .unwrap();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].details(), recurring.details());
    assert!(scheduled[0].scheduled_at().unwrap() > Utc::now());
}

#[tokio::test]
async fn test_eleven_enqueued_with_pool_of_ten_is_one_blocking_dispatch() {
    let jobs: Vec<_> = (0..11).map(|_| enqueued_job()).collect();
    let ids: Vec<_> = jobs.iter().map(|j| j.id()).collect();
    let leader = leader(ScriptedStorage::new().with_page(StateName::Enqueued, jobs), 10);

    let report = leader.zookeeper.run().await.unwrap();

    assert_eq!(report.dispatch_mode, Some(DispatchMode::Blocking));
    assert_eq!(leader.dispatcher.calls(), vec![DispatchCall::Batch(ids)]);
}

#[tokio::test]
async fn test_enqueued_within_pool_dispatched_oldest_first() {
    let leader = leader(InMemoryStorageProvider::new(), 10);
    let mut jobs = Vec::new();
    for offset in [3, 1, 2] {
        let mut job = enqueued_job();
        job.set_updated_at(Utc::now() - ChronoDuration::minutes(offset));
        jobs.push(job);
    }
    let jobs = seed(&leader.storage, jobs).await;

    let report = leader.zookeeper.run().await.unwrap();

    assert_eq!(report.dispatch_mode, Some(DispatchMode::NonBlocking));
    let expected: Vec<_> = [0, 2, 1]
        .iter()
        .map(|&i| DispatchCall::Single(jobs[i].id()))
        .collect();
    assert_eq!(leader.dispatcher.calls(), expected);
    // Dispatch itself changes nothing.
    assert!(leader.filter.transitions().is_empty());
}

#[tokio::test]
async fn test_five_succeeded_jobs_retired_in_one_save() {
    let leader = leader(
        ScriptedStorage::new().with_page(
            StateName::Succeeded,
            (0..5)
                .map(|_| succeeded_job(Utc::now() - ChronoDuration::hours(40)))
                .collect(),
        ),
        10,
    );

    let report = leader.zookeeper.run().await.unwrap();

    assert_eq!(report.retired, 5);
    let saves: Vec<_> = leader
        .storage
        .calls()
        .into_iter()
        .filter(|c| matches!(c, StorageCall::Save(_)))
        .collect();
    assert_eq!(saves.len(), 1);
    assert_eq!(
        leader.storage.published_counters(),
        vec![(StateName::Succeeded, 5)]
    );
    assert_eq!(leader.filter.transitions(), vec!["SUCCEEDED->DELETED"; 5]);
}

#[tokio::test]
async fn test_retention_keeps_recent_succeeded_jobs() {
    let leader = leader(InMemoryStorageProvider::new(), 10);
    seed(
        &leader.storage,
        vec![
            succeeded_job(Utc::now() - ChronoDuration::hours(37)),
            succeeded_job(Utc::now() - ChronoDuration::hours(35)),
        ],
    )
    .await;

    let report = leader.zookeeper.run().await.unwrap();

    assert_eq!(report.retired, 1);
    let stats = leader.storage.job_stats().await.unwrap();
    assert_eq!(stats.count(StateName::Succeeded), 1);
    assert_eq!(stats.count(StateName::Deleted), 1);
    assert_eq!(stats.all_time_succeeded, 1);
}

#[tokio::test]
async fn test_purge_of_five_reports_five_without_filters() {
    let leader = leader(InMemoryStorageProvider::new(), 10);
    let old = Utc::now() - ChronoDuration::hours(100);
    seed(&leader.storage, (0..5).map(|_| deleted_job(old)).collect()).await;
    seed(&leader.storage, vec![deleted_job(Utc::now())]).await;

    let report = leader.zookeeper.run().await.unwrap();

    assert_eq!(report.purged, 5);
    assert!(leader.filter.transitions().is_empty());
    assert_eq!(
        leader.storage.count_jobs(StateName::Deleted).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_orphan_fails_and_live_job_survives() {
    let leader = leader(InMemoryStorageProvider::new(), 10);
    let jobs = seed(
        &leader.storage,
        vec![
            processing_job(Utc::now() - ChronoDuration::minutes(5)),
            processing_job(Utc::now()),
        ],
    )
    .await;

    let report = leader.zookeeper.run().await.unwrap();

    assert_eq!(report.orphaned, 1);
    let orphan = leader.storage.get_job(jobs[0].id()).await.unwrap();
    assert_eq!(orphan.state_name(), StateName::Failed);
    let live = leader.storage.get_job(jobs[1].id()).await.unwrap();
    assert_eq!(live.state_name(), StateName::Processing);
}

#[tokio::test]
async fn test_every_transition_adds_one_history_entry() {
    let leader = leader(InMemoryStorageProvider::new(), 10);
    let jobs = seed(
        &leader.storage,
        (0..3i64)
            .map(|i| scheduled_job(Utc::now() - ChronoDuration::seconds(10 - i)))
            .collect(),
    )
    .await;

    leader.zookeeper.run().await.unwrap();

    assert_eq!(leader.filter.transitions(), vec!["SCHEDULED->ENQUEUED"; 3]);
    for job in &jobs {
        let stored = leader.storage.get_job(job.id()).await.unwrap();
        assert_eq!(stored.history().len(), 2);
        assert_eq!(stored.version(), 2);
    }
}

#[tokio::test]
async fn test_paging_drains_more_than_one_page() {
    let leader = leader(InMemoryStorageProvider::new(), 10);
    seed(
        &leader.storage,
        (0..25).map(|_| scheduled_job(Utc::now() - ChronoDuration::seconds(1))).collect(),
    )
    .await;
    let zookeeper = leader.zookeeper.with_config(ZooKeeperConfig {
        page_size: 10,
        ..ZooKeeperConfig::default()
    });

    let report = zookeeper.run().await.unwrap();

    assert_eq!(report.activated, 25);
    assert_eq!(
        leader.storage.count_jobs(StateName::Scheduled).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_follower_makes_no_storage_calls() {
    let storage =
        Arc::new(ScriptedStorage::new().with_page(StateName::Enqueued, vec![enqueued_job()]));
    let status = Arc::new(ServerStatus::new(Duration::from_secs(15), 10));
    let zookeeper = JobZooKeeper::new(
        Arc::clone(&storage),
        status,
        Arc::new(JobFilters::new()),
        Arc::new(RecordingDispatcher::new()),
        Arc::new(StorageJobScheduler::new(Arc::clone(&storage))),
    );

    let report = zookeeper.run().await.unwrap();

    assert!(!report.ran);
    assert!(storage.calls().is_empty());
}
