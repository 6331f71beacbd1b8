//! Common test utilities shared across integration tests.

use jobkeeper::{
    BackgroundJobServer, InMemoryStorageProvider, Job, JobId, JobRunner, ServerConfig, StateName,
    StorageProvider,
};
use std::sync::Arc;
use std::time::Duration;

/// Wait for a job to reach an expected state, polling storage.
///
/// Polls every 10ms and times out after the specified duration.
///
/// # Panics
///
/// Panics if the timeout is reached before the job reaches the expected state.
pub async fn wait_for_state(
    storage: &dyn StorageProvider,
    job_id: JobId,
    expected: StateName,
    timeout: Duration,
) -> Job {
    let start = tokio::time::Instant::now();
    loop {
        let job = storage.get_job(job_id).await.unwrap();
        if job.state_name() == expected {
            return job;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for job {} to reach {}, current state: {}",
                job_id,
                expected,
                job.state_name()
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Server settings for tests: ticks only when asked, small pool.
pub fn manual_tick_config() -> ServerConfig {
    ServerConfig {
        poll_interval_secs: 3600,
        worker_pool_size: 4,
        shutdown_timeout_secs: 5,
        ..ServerConfig::default()
    }
}

/// A server over `storage` that only ticks on demand.
pub fn server(
    storage: &Arc<InMemoryStorageProvider>,
    runner: Arc<dyn JobRunner>,
) -> BackgroundJobServer<InMemoryStorageProvider> {
    BackgroundJobServer::new(Arc::clone(storage), runner).with_config(manual_tick_config())
}

/// Persist `jobs` as new jobs.
pub async fn seed(storage: &InMemoryStorageProvider, mut jobs: Vec<Job>) -> Vec<Job> {
    storage.save(&mut jobs).await.unwrap();
    jobs
}
