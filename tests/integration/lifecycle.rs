//! Job lifecycle integration tests.
//!
//! Run a full background job server and follow jobs from creation to
//! their final state.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use jobkeeper::testing::{RecordingFilter, TestRunner, processing_job};
use jobkeeper::{
    InMemoryStorageProvider, Job, JobDetails, JobRunError, JobRunner, ServerConfig, StateName,
    StorageProvider,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::common::{manual_tick_config, seed, server, wait_for_state};

/// Runner that fails jobs whose method is `explode`.
struct SelectiveRunner {
    runs: AtomicUsize,
}

#[async_trait]
impl JobRunner for SelectiveRunner {
    async fn run(&self, job: &Job) -> Result<(), JobRunError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if job.details().method_name() == "explode" {
            return Err(JobRunError::new("exploded on purpose"));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_enqueued_job_runs_to_success() {
    let storage = Arc::new(InMemoryStorageProvider::new());
    let filter = Arc::new(RecordingFilter::new());
    let server = server(&storage, Arc::new(TestRunner::succeeding())).with_filter(filter.clone());
    let (handle, task) = server.start().unwrap();

    let id = server
        .enqueue(JobDetails::new("mail.Sender", "flush"))
        .await
        .unwrap();
    let report = handle.tick().await.unwrap();
    assert_eq!(report.dispatched, 1);

    let job = wait_for_state(&*storage, id, StateName::Succeeded, Duration::from_secs(5)).await;
    assert_eq!(job.history().len(), 3);
    assert_eq!(
        job.history()[1].server_id(),
        Some(handle.status().id.to_string().as_str())
    );
    assert_eq!(
        filter.transitions(),
        vec!["ENQUEUED->PROCESSING", "PROCESSING->SUCCEEDED"]
    );

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_failures_are_recorded_per_job() {
    let storage = Arc::new(InMemoryStorageProvider::new());
    let runner = Arc::new(SelectiveRunner {
        runs: AtomicUsize::new(0),
    });
    let server = server(&storage, runner.clone());
    let (handle, task) = server.start().unwrap();

    let ok = server
        .enqueue(JobDetails::new("report.Builder", "build"))
        .await
        .unwrap();
    let bad = server
        .enqueue(JobDetails::new("report.Builder", "explode"))
        .await
        .unwrap();
    handle.tick().await.unwrap();

    wait_for_state(&*storage, ok, StateName::Succeeded, Duration::from_secs(5)).await;
    let failed = wait_for_state(&*storage, bad, StateName::Failed, Duration::from_secs(5)).await;
    assert_eq!(failed.state().reason(), Some("exploded on purpose"));
    assert_eq!(runner.runs.load(Ordering::SeqCst), 2);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_due_scheduled_job_runs_within_two_ticks() {
    let storage = Arc::new(InMemoryStorageProvider::new());
    let server = server(&storage, Arc::new(TestRunner::succeeding()));
    let (handle, task) = server.start().unwrap();

    let due = server
        .schedule(
            JobDetails::new("invoice.Sender", "send"),
            Utc::now() - ChronoDuration::seconds(1),
        )
        .await
        .unwrap();
    let later = server
        .schedule(
            JobDetails::new("invoice.Sender", "remind"),
            Utc::now() + ChronoDuration::hours(1),
        )
        .await
        .unwrap();

    // Activation and dispatch happen in the same tick.
    let report = handle.tick().await.unwrap();
    assert_eq!(report.activated, 1);
    assert_eq!(report.dispatched, 1);

    wait_for_state(&*storage, due, StateName::Succeeded, Duration::from_secs(5)).await;
    let later = storage.get_job(later).await.unwrap();
    assert_eq!(later.state_name(), StateName::Scheduled);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_orphaned_job_is_failed_by_leader() {
    let storage = Arc::new(InMemoryStorageProvider::new());
    let jobs = seed(
        &storage,
        vec![processing_job(Utc::now() - ChronoDuration::minutes(10))],
    )
    .await;
    let server = server(&storage, Arc::new(TestRunner::succeeding()));
    let (handle, task) = server.start().unwrap();

    let report = handle.tick().await.unwrap();

    assert_eq!(report.orphaned, 1);
    let job = storage.get_job(jobs[0].id()).await.unwrap();
    assert_eq!(job.state_name(), StateName::Failed);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_long_job_heartbeat_prevents_orphaning() {
    let storage = Arc::new(InMemoryStorageProvider::new());
    let server = jobkeeper::BackgroundJobServer::new(
        Arc::clone(&storage),
        Arc::new(TestRunner::succeeding().with_delay(Duration::from_millis(3000))),
    )
    .with_config(ServerConfig {
        heartbeat_interval_secs: Some(1),
        orphan_timeout_secs: Some(2),
        ..manual_tick_config()
    });
    let (handle, task) = server.start().unwrap();

    let id = server
        .enqueue(JobDetails::new("video.Encoder", "encode"))
        .await
        .unwrap();
    handle.tick().await.unwrap();
    // Without heartbeats the job would be older than the orphan timeout here.
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let report = handle.tick().await.unwrap();
    assert_eq!(report.orphaned, 0);

    wait_for_state(&*storage, id, StateName::Succeeded, Duration::from_secs(5)).await;
    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_waits_for_running_jobs() {
    let storage = Arc::new(InMemoryStorageProvider::new());
    let server = server(
        &storage,
        Arc::new(TestRunner::succeeding().with_delay(Duration::from_millis(200))),
    );
    let (handle, task) = server.start().unwrap();

    let id = server
        .enqueue(JobDetails::new("batch.Importer", "import"))
        .await
        .unwrap();
    handle.tick().await.unwrap();
    handle.shutdown().await.unwrap();
    task.await.unwrap();

    let job = storage.get_job(id).await.unwrap();
    assert_eq!(job.state_name(), StateName::Succeeded);
}
