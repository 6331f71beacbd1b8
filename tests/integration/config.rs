//! Configuration integration tests.
//!
//! Load YAML from disk, register the recurring jobs it defines and check
//! that a tick schedules them.

use jobkeeper::testing::TestRunner;
use jobkeeper::{
    BackgroundJobServer, ConfigError, InMemoryStorageProvider, PageRequest,
    RecurringJobConfigBuilder, StateName, StorageProvider, YamlLoader,
    load_recurring_jobs_from_directory,
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const CONFIG: &str = r#"
server:
  poll_interval_secs: 3600
  worker_pool_size: 2
  shutdown_timeout_secs: 5
default_timezone: Europe/Brussels
recurring_jobs:
  - id: nightly-report
    schedule: "0 2 * * *"
    job:
      class: reports.Generator
      method: build
      parameters:
        - { class: String, value: weekly }
        - { class: Integer, value: 3 }
"#;

#[tokio::test]
async fn test_yaml_recurring_job_is_scheduled() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", CONFIG).unwrap();
    let config = YamlLoader::load_config(file.path()).unwrap();
    let recurring = RecurringJobConfigBuilder::build_all(&config).unwrap();
    assert_eq!(recurring.len(), 1);
    assert_eq!(recurring[0].schedule_offset(), "Europe/Brussels");

    let storage = Arc::new(InMemoryStorageProvider::new());
    let server = BackgroundJobServer::new(Arc::clone(&storage), Arc::new(TestRunner::succeeding()))
        .with_config(config.server.clone());
    assert_eq!(server.config().poll_interval(), Duration::from_secs(3600));
    for job in recurring {
        server.register_recurring_job(job).await.unwrap();
    }
    let (handle, task) = server.start().unwrap();

    let report = handle.tick().await.unwrap();

    assert_eq!(report.recurring_scheduled, 1);
    let scheduled = storage
        .get_jobs(StateName::Scheduled, None, PageRequest::asc(0, 10))
        .await
        .unwrap();
    let details = scheduled[0].details();
    assert_eq!(details.class_name(), "reports.Generator");
    assert_eq!(details.method_name(), "build");
    let values: Vec<_> = details.parameters().iter().map(|p| p.value.as_str()).collect();
    assert_eq!(values, vec!["\"weekly\"", "3"]);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_recurring_jobs_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("b-cleanup.yaml"),
        "id: cleanup\nschedule: \"@hourly\"\njob: { class: maintenance.Cleaner, method: run }\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("a-digest.yml"),
        concat!(
            "id: digest\n",
            "schedule: { cron: \"@daily\", timezone: Asia/Tokyo }\n",
            "job: { class: mail.Digest, method: send }\n",
        ),
    )
    .unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let jobs = load_recurring_jobs_from_directory(dir.path(), None).unwrap();

    let ids: Vec<_> = jobs.iter().map(|j| j.id().to_string()).collect();
    assert_eq!(ids, vec!["digest", "cleanup"]);
    assert_eq!(jobs[0].schedule_offset(), "Asia/Tokyo");
    assert_eq!(jobs[1].schedule_offset(), "UTC");
}

#[test]
fn test_invalid_schedule_is_reported_with_job_id() {
    let yaml = r#"
recurring_jobs:
  - id: broken
    schedule: "not a cron"
    job: { class: a.B, method: c }
"#;
    let config = YamlLoader::parse_config(yaml).unwrap();

    let err = RecurringJobConfigBuilder::build_all(&config).unwrap_err();

    assert!(matches!(err, ConfigError::InvalidConfig(_)));
    assert!(err.to_string().contains("broken"));
}

#[test]
fn test_invalid_server_settings_refuse_to_start() {
    let config = YamlLoader::parse_config("server:\n  poll_interval_secs: 0\n");
    assert!(matches!(config, Err(ConfigError::InvalidConfig(_))));
}
