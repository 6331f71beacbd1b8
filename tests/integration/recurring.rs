//! Recurring job integration tests.

use jobkeeper::testing::TestRunner;
use jobkeeper::{
    InMemoryStorageProvider, JobDetails, PageRequest, RecurringJob, Schedule, StateName,
    StorageProvider,
};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{server, wait_for_state};

#[tokio::test]
async fn test_recurring_job_runs_and_reschedules() {
    let storage = Arc::new(InMemoryStorageProvider::new());
    let runner = Arc::new(TestRunner::succeeding());
    let server = server(&storage, runner.clone());
    server
        .register_recurring_job(RecurringJob::new(
            "heartbeat-ping",
            JobDetails::new("ping.Service", "ping"),
            Schedule::new("@every 1s").unwrap(),
        ))
        .await
        .unwrap();
    let (handle, task) = server.start().unwrap();

    let first = handle.tick().await.unwrap();
    assert_eq!(first.recurring_scheduled, 1);
    let scheduled = storage
        .get_jobs(StateName::Scheduled, None, PageRequest::asc(0, 10))
        .await
        .unwrap();
    assert_eq!(scheduled.len(), 1);
    let instance = scheduled[0].id();

    // Becomes due; the outstanding instance blocks a second one.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let second = handle.tick().await.unwrap();
    assert_eq!(second.recurring_scheduled, 0);
    assert_eq!(second.activated, 1);
    wait_for_state(&*storage, instance, StateName::Succeeded, Duration::from_secs(5)).await;
    assert_eq!(runner.runs().len(), 1);

    let third = handle.tick().await.unwrap();
    assert_eq!(third.recurring_scheduled, 1);
    assert_eq!(storage.count_jobs(StateName::Scheduled).await.unwrap(), 1);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_registering_same_id_replaces_definition() {
    let storage = Arc::new(InMemoryStorageProvider::new());
    let server = server(&storage, Arc::new(TestRunner::succeeding()));
    for method in ["old", "new"] {
        server
            .register_recurring_job(RecurringJob::new(
                "report",
                JobDetails::new("report.Builder", method),
                Schedule::new("@daily").unwrap(),
            ))
            .await
            .unwrap();
    }
    let (handle, task) = server.start().unwrap();

    let report = handle.tick().await.unwrap();

    assert_eq!(report.recurring_scheduled, 1);
    let scheduled = storage
        .get_jobs(StateName::Scheduled, None, PageRequest::asc(0, 10))
        .await
        .unwrap();
    assert_eq!(scheduled[0].details().method_name(), "new");

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}
